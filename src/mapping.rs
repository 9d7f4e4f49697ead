use polars::prelude::*;

use crate::config::Protocol;
use crate::diagnostics::RowLedger;
use crate::error::{BenthosError, Result};
use crate::schema::{observation, taxonomy, twn};
use crate::twn::{distinct_names, filter_usefull_twn};

fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &name in required {
        if df.column(name).is_err() {
            return Err(BenthosError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

/// Resolve every reported taxon name to a valid TWN name via the synonym
/// column. Names the TWN does not know at all are fatal: no aggregation key
/// can be derived for them.
pub fn add_valid_taxonnames(df: &DataFrame, usefull_twn: &DataFrame) -> Result<DataFrame> {
    require_columns(usefull_twn, &[twn::NAME, twn::SYNONYMNAME])?;
    require_columns(df, &[observation::PARAMETER_SPECIFICATIE])?;

    let ledger = RowLedger::start("add_valid_taxonnames", df);

    // valid taxa resolve to themselves, synonyms to their refername
    let twn_mapping = usefull_twn
        .select([twn::NAME, twn::SYNONYMNAME])?
        .lazy()
        .with_column(
            coalesce(&[col(twn::SYNONYMNAME), col(twn::NAME)]).alias(twn::SYNONYMNAME),
        );

    let result = df
        .clone()
        .lazy()
        .join(
            twn_mapping,
            [col(observation::PARAMETER_SPECIFICATIE)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let unknown = result
        .clone()
        .lazy()
        .filter(col(twn::SYNONYMNAME).is_null())
        .collect()?;
    if unknown.height() > 0 {
        let names = distinct_names(&unknown, observation::PARAMETER_SPECIFICATIE)?;
        return Err(BenthosError::MappingCoverage(format!(
            "observation data contains taxa unknown to the TWN: {}",
            names.join(", ")
        )));
    }

    ledger.finish(&result)?;
    Ok(result)
}

/// Join the protocol mapping and derive the per-row analysis name plus the
/// presence and biomass discriminators, honouring each row's own protocol.
pub fn add_protocol_mapping(df: &DataFrame, protocol_map: &DataFrame) -> Result<DataFrame> {
    let ledger = RowLedger::start("add_protocol_mapping", df);

    let zoet_overrule = Protocol::Zoet.overrule_column();
    let zout_overrule = Protocol::Zout.overrule_column();

    let result = df
        .clone()
        .lazy()
        .join(
            protocol_map.clone().lazy(),
            [col(twn::SYNONYMNAME)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .with_columns([
            when(
                col(observation::DETERMINATIE_PROTOCOL)
                    .eq(lit(observation::PROTOCOL_ZOET)),
            )
            .then(coalesce(&[col(&zoet_overrule), col(twn::SYNONYMNAME)]))
            .otherwise(coalesce(&[col(&zout_overrule), col(twn::SYNONYMNAME)]))
            .alias(observation::ANALYSE_TAXONNAAM),
            when(
                col(observation::DETERMINATIE_PROTOCOL)
                    .eq(lit(observation::PROTOCOL_ZOUT)),
            )
            .then(col(&Protocol::Zout.presentie_column()))
            .otherwise(col(&Protocol::Zoet.presentie_column()))
            .alias(observation::IS_PRESENTIE_PROTOCOL),
            // a missing biomass protocol means the row is not biomass-determined
            when(
                col(observation::BIOMASSA_PROTOCOL)
                    .eq_missing(lit(observation::PROTOCOL_ZOUT)),
            )
            .then(col(&Protocol::Zout.biomassa_column()))
            .otherwise(lit(false))
            .alias(observation::IS_BIOMASSA_PROTOCOL),
        ])
        .collect()?;
    let result = result.drop(twn::PARENTNAME)?.drop(twn::STATUSCODE)?;

    for column in [
        observation::ANALYSE_TAXONNAAM,
        observation::IS_PRESENTIE_PROTOCOL,
        observation::IS_BIOMASSA_PROTOCOL,
    ] {
        let gaps = result
            .clone()
            .lazy()
            .filter(col(column).is_null())
            .collect()?;
        if gaps.height() > 0 {
            let names = distinct_names(&gaps, observation::ANALYSE_TAXONNAAM)?;
            return Err(BenthosError::MappingCoverage(format!(
                "protocol mapping join left '{column}' empty for: {}",
                names.join(", ")
            )));
        }
    }

    ledger.finish(&result)?;
    Ok(result)
}

/// Join the taxa mapping: the subspecies overrule, rank order, hierarchy
/// string and combi label every diversity stage depends on.
pub fn add_taxa_mapping(df: &DataFrame, taxa_map: &DataFrame) -> Result<DataFrame> {
    let ledger = RowLedger::start("add_taxa_mapping", df);

    let result = df
        .clone()
        .lazy()
        .join(
            taxa_map.clone().lazy(),
            [col(observation::ANALYSE_TAXONNAAM)],
            [col(taxonomy::TWN_NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            // only an actual collapse counts as an overrule
            when(
                col(twn::NAME)
                    .is_not_null()
                    .and(col(twn::NAME).neq(col(observation::ANALYSE_TAXONNAAM))),
            )
            .then(col(twn::NAME))
            .otherwise(lit(NULL).cast(DataType::String))
            .alias(observation::OVERRULE_SUBSPECIESNAME),
        )
        .with_column(
            coalesce(&[
                col(observation::OVERRULE_SUBSPECIESNAME),
                col(observation::ANALYSE_TAXONNAAM),
            ])
            .alias(observation::ANALYSE_TAXONNAAM),
        )
        .collect()?;
    let result = result.drop(twn::NAME)?;

    let no_hierarchy = result
        .clone()
        .lazy()
        .filter(
            col(taxonomy::HIERARCHIE)
                .is_null()
                .and(col(twn::SYNONYMNAME).neq(lit(twn::ROOT))),
        )
        .collect()?;
    if no_hierarchy.height() > 0 {
        let names = distinct_names(&no_hierarchy, twn::SYNONYMNAME)?;
        return Err(BenthosError::ReferenceData(format!(
            "taxa without a hierarchy: {}",
            names.join(", ")
        )));
    }

    let unnamed = result
        .clone()
        .lazy()
        .filter(col(observation::ANALYSE_TAXONNAAM).is_null())
        .collect()?;
    if unnamed.height() > 0 {
        let names = distinct_names(&unnamed, twn::SYNONYMNAME)?;
        return Err(BenthosError::MappingCoverage(format!(
            "taxa without an analysis name: {}",
            names.join(", ")
        )));
    }

    check_rank_consistency(&result)?;

    ledger.finish(&result)?;
    Ok(result)
}

/// Each analysis name must resolve to exactly one (rank, order) pair;
/// anything else makes the downstream aggregation keys ambiguous.
fn check_rank_consistency(df: &DataFrame) -> Result<()> {
    use std::collections::HashMap;

    let names = df.column(observation::ANALYSE_TAXONNAAM)?.str()?;
    let ranks = df.column(twn::TAXONRANK)?.str()?;
    let orders = df.column(taxonomy::ORDER)?.cast(&DataType::Int32)?;
    let orders = orders.i32()?;

    let mut seen: HashMap<&str, (Option<&str>, Option<i32>)> = HashMap::new();
    let mut inconsistent: Vec<String> = Vec::new();
    for i in 0..df.height() {
        let Some(name) = names.get(i) else { continue };
        let pair = (ranks.get(i), orders.get(i));
        match seen.get(name) {
            Some(existing) if *existing != pair => inconsistent.push(name.to_string()),
            Some(_) => {}
            None => {
                seen.insert(name, pair);
            }
        }
    }

    if inconsistent.is_empty() {
        Ok(())
    } else {
        inconsistent.sort();
        inconsistent.dedup();
        Err(BenthosError::MappingCoverage(format!(
            "conflicting taxonrank assignment for: {}",
            inconsistent.join(", ")
        )))
    }
}

/// Final gate on the enriched observations: the columns every downstream
/// consumer keys on must be fully populated.
pub fn check_mapped_observations(df: &DataFrame) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();
    for column in [
        observation::COLLECTIE_REFERENTIE,
        observation::PARAMETER_SPECIFICATIE,
        observation::DETERMINATIE_PROTOCOL,
        taxonomy::ORDER,
        observation::ANALYSE_TAXONNAAM,
        observation::IS_PRESENTIE_PROTOCOL,
        observation::IS_BIOMASSA_PROTOCOL,
    ] {
        let Ok(series) = df.column(column) else {
            problems.push(format!("missing column '{column}'"));
            continue;
        };
        let nulls = series.null_count();
        if nulls > 0 {
            problems.push(format!("column '{column}' has {nulls} empty values"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(BenthosError::MappingCoverage(problems.join("; ")))
    }
}

/// Enrich raw observations with every mapping in the order the pipeline
/// requires: synonym resolution, protocol recoding, taxa mapping, final gate.
pub fn add_mappings(
    df: &DataFrame,
    twn_corrected: &DataFrame,
    protocol_map: &DataFrame,
    taxa_map: &DataFrame,
) -> Result<DataFrame> {
    let usefull_twn = filter_usefull_twn(twn_corrected)?;
    let df = add_valid_taxonnames(df, &usefull_twn)?;
    let df = add_protocol_mapping(&df, protocol_map)?;
    let df = add_taxa_mapping(&df, taxa_map)?;
    check_mapped_observations(&df)?;
    Ok(df)
}
