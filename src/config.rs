use polars::prelude::*;
use serde::Deserialize;

use crate::schema::mapping;

/// Determination protocol: freshwater (zoet) or saltwater (zout) rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Protocol {
    Zoet,
    Zout,
}

impl Protocol {
    /// Prefix used in mapping column names ("Zoet"/"Zout").
    pub fn column_prefix(self) -> &'static str {
        match self {
            Protocol::Zoet => "Zoet",
            Protocol::Zout => "Zout",
        }
    }

    pub fn overrule_column(self) -> String {
        format!("{}{}", self.column_prefix(), mapping::OVERRULE_SUFFIX)
    }

    pub fn presentie_column(self) -> String {
        format!("{}{}", self.column_prefix(), mapping::PRESENTIE_SUFFIX)
    }

    pub fn biomassa_column(self) -> String {
        format!("{}{}", self.column_prefix(), mapping::BIOMASSA_SUFFIX)
    }
}

/// A configured pair of anchor lists: the taxa whose subtrees are aggregated,
/// and the contra taxa whose subtrees are carved back out as exceptions.
///
/// `None` means the list is absent from the configuration, which the
/// hierarchy builder turns into its empty sentinel frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnchorSet {
    pub aggregate: Option<Vec<String>>,
    pub contra: Option<Vec<String>>,
}

impl AnchorSet {
    pub fn new<S: Into<String>>(
        aggregate: impl IntoIterator<Item = S>,
        contra: impl IntoIterator<Item = S>,
    ) -> Self {
        let aggregate: Vec<String> = aggregate.into_iter().map(Into::into).collect();
        let contra: Vec<String> = contra.into_iter().map(Into::into).collect();
        Self {
            aggregate: (!aggregate.is_empty()).then_some(aggregate),
            contra: (!contra.is_empty()).then_some(contra),
        }
    }
}

/// Anchor configuration per protocol and analysis action.
///
/// Determination and presence exist for both protocols; the biomass exclusion
/// protocol is only defined for salt waterbodies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolConfig {
    pub determination_zoet: AnchorSet,
    pub determination_zout: AnchorSet,
    pub presence_zoet: AnchorSet,
    pub presence_zout: AnchorSet,
    pub biomass_exclude_zout: AnchorSet,
}

impl ProtocolConfig {
    pub fn determination(&self, protocol: Protocol) -> &AnchorSet {
        match protocol {
            Protocol::Zoet => &self.determination_zoet,
            Protocol::Zout => &self.determination_zout,
        }
    }

    pub fn presence(&self, protocol: Protocol) -> &AnchorSet {
        match protocol {
            Protocol::Zoet => &self.presence_zoet,
            Protocol::Zout => &self.presence_zout,
        }
    }
}

/// A named aggregation scope (sample, area, waterbody, ...) with the grouping
/// columns that define it. Order is meaningful: output columns are emitted in
/// configuration order.
#[derive(Debug, Clone, Deserialize)]
pub struct DiversityLevel {
    pub name: String,
    pub group_columns: Vec<String>,
}

impl DiversityLevel {
    pub fn new<S: Into<String>>(name: &str, group_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.to_string(),
            group_columns: group_columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Build the taxonomic rank-order table the taxonomy join expects:
/// one row per rank name with its integer coarseness order.
pub fn rank_order_frame(pairs: &[(&str, i32)]) -> PolarsResult<DataFrame> {
    let ranks: Vec<&str> = pairs.iter().map(|(r, _)| *r).collect();
    let orders: Vec<i32> = pairs.iter().map(|(_, o)| *o).collect();
    df!(
        crate::schema::twn::TAXONRANK => ranks,
        crate::schema::taxonomy::ORDER => orders,
    )
}
