use polars::prelude::*;

use crate::config::{AnchorSet, Protocol, ProtocolConfig};
use crate::diagnostics::RowLedger;
use crate::error::Result;
use crate::schema::{mapping, twn};
use crate::tree::{build_taxon_hierarchie, TwnTree};
use crate::twn::select_twn_mapping_columns;

/// Recode the TWN taxa to the uniform determination level of a protocol.
///
/// The aggregate anchors map their whole subtree onto the anchor name; the
/// contra anchors carve exceptions back out of those subtrees. The contra
/// override wins, then the aggregate override, then the taxon keeps its own
/// name (null in the overrule column). Two passes are required because the
/// exceptions are subtrees nested inside the aggregated subtree.
pub fn uniform_determination_mapping(
    twn_df: &DataFrame,
    tree: &TwnTree,
    protocol: Protocol,
    anchors: &AnchorSet,
) -> Result<DataFrame> {
    let ledger = RowLedger::start("uniform_determination_mapping", twn_df);

    let recode = build_taxon_hierarchie(anchors.aggregate.as_deref(), tree, false)?;
    let contra = build_taxon_hierarchie(anchors.contra.as_deref(), tree, true)?;

    let overrule_column = protocol.overrule_column();
    let resolved = recode
        .lazy()
        .join(
            contra.lazy(),
            [col(twn::NAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            coalesce(&[
                col(mapping::CONTRA_TAXONNAME),
                col(mapping::OVERRULE_TAXONNAME),
            ])
            .alias(&overrule_column),
        )
        .select([col(twn::NAME), col(&overrule_column)]);

    let result = twn_df
        .clone()
        .lazy()
        .join(
            resolved,
            [col(twn::NAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    ledger.finish(&result)?;
    Ok(result)
}

/// Mark the taxa that only count toward presence reporting for a protocol.
/// Taxa outside the configured subtrees default to false.
pub fn presence_mapping(
    twn_df: &DataFrame,
    tree: &TwnTree,
    protocol: Protocol,
    anchors: &AnchorSet,
) -> Result<DataFrame> {
    let ledger = RowLedger::start("presence_mapping", twn_df);

    let presence = build_taxon_hierarchie(anchors.aggregate.as_deref(), tree, false)?;
    let contra = build_taxon_hierarchie(anchors.contra.as_deref(), tree, true)?;

    let flag_column = protocol.presentie_column();
    let marked = presence
        .lazy()
        .join(
            contra.lazy(),
            [col(twn::NAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .filter(col(mapping::CONTRA_TAXONNAME).is_null())
        .select([col(twn::NAME)])
        .with_column(lit(true).alias(&flag_column));

    let result = twn_df
        .clone()
        .lazy()
        .join(
            marked,
            [col(twn::NAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col(&flag_column).fill_null(lit(false)))
        .collect()?;

    ledger.finish(&result)?;
    Ok(result)
}

/// Mark the taxa excluded from biomass determination. Only defined for the
/// saltwater protocol; taxa outside the configured subtrees default to true
/// (biomass-eligible).
pub fn biomassa_exclude_mapping(
    twn_df: &DataFrame,
    tree: &TwnTree,
    anchors: &AnchorSet,
) -> Result<DataFrame> {
    let ledger = RowLedger::start("biomassa_exclude_mapping", twn_df);

    let exclude = build_taxon_hierarchie(anchors.aggregate.as_deref(), tree, false)?;
    let contra = build_taxon_hierarchie(anchors.contra.as_deref(), tree, true)?;

    let flag_column = Protocol::Zout.biomassa_column();
    let marked = exclude
        .lazy()
        .join(
            contra.lazy(),
            [col(twn::NAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .filter(col(mapping::CONTRA_TAXONNAME).is_null())
        .select([col(twn::NAME)])
        .with_column(lit(false).alias(&flag_column));

    let result = twn_df
        .clone()
        .lazy()
        .join(
            marked,
            [col(twn::NAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col(&flag_column).fill_null(lit(true)))
        .collect()?;

    ledger.finish(&result)?;
    Ok(result)
}

/// Build the full protocol mapping the observation enrichment joins against:
/// determination overrides for both protocols, presence flags for both, and
/// the saltwater biomass exclusion.
pub fn build_protocol_mapping(
    valid_twn: &DataFrame,
    tree: &TwnTree,
    config: &ProtocolConfig,
) -> Result<DataFrame> {
    let mut df = select_twn_mapping_columns(valid_twn)?;
    for protocol in [Protocol::Zoet, Protocol::Zout] {
        df = uniform_determination_mapping(&df, tree, protocol, config.determination(protocol))?;
    }
    for protocol in [Protocol::Zoet, Protocol::Zout] {
        df = presence_mapping(&df, tree, protocol, config.presence(protocol))?;
    }
    df = biomassa_exclude_mapping(&df, tree, &config.biomass_exclude_zout)?;
    Ok(df)
}
