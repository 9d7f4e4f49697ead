use polars::prelude::*;
use tracing::error;

use crate::diagnostics::RowLedger;
use crate::error::{BenthosError, Result};
use crate::schema::twn;

fn valid_statuscodes() -> Series {
    Series::new("".into(), &twn::VALID_STATUSCODES)
}

/// Collect the distinct values of a string column, sorted, for diagnostics.
pub(crate) fn distinct_names(df: &DataFrame, column: &str) -> Result<Vec<String>> {
    let ca = df.column(column)?.str()?;
    let names: std::collections::BTreeSet<&str> = ca.into_iter().flatten().collect();
    Ok(names.into_iter().map(str::to_string).collect())
}

/// Keep only the valid taxa: statuscodes 10 and 80.
pub fn filter_valid_twn(twn_df: &DataFrame) -> Result<DataFrame> {
    let mut ledger = RowLedger::start("filter_valid_twn", twn_df);

    let filtered = twn_df
        .clone()
        .lazy()
        .filter(
            col(twn::STATUSCODE)
                .cast(DataType::Int32)
                .is_in(lit(valid_statuscodes()), false),
        )
        .collect()?;

    ledger.record("invalid_statuscode", twn_df.height() - filtered.height());
    ledger.finish(&filtered)?;
    Ok(filtered)
}

/// Keep the valid taxa plus the invalid taxa that carry a synonym, so raw
/// observation names can still be resolved to a valid name.
pub fn filter_usefull_twn(twn_df: &DataFrame) -> Result<DataFrame> {
    let mut ledger = RowLedger::start("filter_usefull_twn", twn_df);

    let filtered = twn_df
        .clone()
        .lazy()
        .filter(
            col(twn::STATUSCODE)
                .cast(DataType::Int32)
                .is_in(lit(valid_statuscodes()), false)
                .or(col(twn::SYNONYMNAME).is_not_null()),
        )
        .collect()?;

    ledger.record("invalid_statuscode", twn_df.height() - filtered.height());
    ledger.finish(&filtered)?;
    Ok(filtered)
}

/// The minimal columns the protocol mapping operates on.
pub fn select_twn_mapping_columns(twn_df: &DataFrame) -> Result<DataFrame> {
    let df = twn_df.select([twn::NAME, twn::PARENTNAME, twn::STATUSCODE])?;
    Ok(df)
}

/// Fatal integrity checks on the corrected TWN. All violations are reported
/// before the run is aborted, so the operator sees the full damage at once.
pub fn check_twn(twn_df: &DataFrame) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();

    // every valid non-root taxon has a parent
    let missing_parents = twn_df
        .clone()
        .lazy()
        .filter(
            col(twn::STATUSCODE)
                .cast(DataType::Int32)
                .is_in(lit(valid_statuscodes()), false)
                .and(col(twn::PARENTNAME).is_null())
                .and(col(twn::NAME).neq(lit(twn::ROOT))),
        )
        .collect()?;
    if missing_parents.height() > 0 {
        let names = distinct_names(&missing_parents, twn::NAME)?;
        error!(taxa = ?names, "twn taxa without a parentname");
        problems.push(format!("taxa without parentname: {}", names.join(", ")));
    }

    // everywhere a taxongroup code
    if twn_df.schema().contains(twn::TAXONGROUP_CODE) {
        let missing_groups = twn_df
            .clone()
            .lazy()
            .filter(col(twn::TAXONGROUP_CODE).is_null())
            .collect()?;
        if missing_groups.height() > 0 {
            let names = distinct_names(&missing_groups, twn::NAME)?;
            error!(taxa = ?names, "twn taxa without a taxongroup code");
            problems.push(format!("taxa without taxongroup code: {}", names.join(", ")));
        }
    }

    // everywhere a taxonrank
    let missing_ranks = twn_df
        .clone()
        .lazy()
        .filter(col(twn::TAXONRANK).is_null())
        .collect()?;
    if missing_ranks.height() > 0 {
        let names = distinct_names(&missing_ranks, twn::NAME)?;
        error!(taxa = ?names, "twn taxa without a taxonrank");
        problems.push(format!("taxa without taxonrank: {}", names.join(", ")));
    }

    // invalid-with-synonym statuscodes must actually carry the synonym
    let missing_synonyms = twn_df
        .clone()
        .lazy()
        .filter(
            col(twn::STATUSCODE)
                .cast(DataType::Int32)
                .is_in(
                    lit(Series::new("".into(), &twn::SYNONYM_STATUSCODES)),
                    false,
                )
                .and(col(twn::SYNONYMNAME).is_null()),
        )
        .collect()?;
    if missing_synonyms.height() > 0 {
        let names = distinct_names(&missing_synonyms, twn::NAME)?;
        error!(taxa = ?names, "twn synonyms without a refername");
        problems.push(format!("synonyms without refername: {}", names.join(", ")));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(BenthosError::ReferenceData(problems.join("; ")))
    }
}

/// Classify observation taxon names against the TWN: valid, synonym,
/// invalid or unknown. Soft reporting only, the caller decides what to log.
pub fn twn_validity(twn_df: &DataFrame, df: &DataFrame) -> Result<DataFrame> {
    use crate::schema::observation;

    let lookup = twn_df
        .select([twn::NAME, twn::STATUSCODE, twn::SYNONYMNAME])?
        .lazy();

    let classified = df
        .clone()
        .lazy()
        .join(
            lookup,
            [col(observation::ANALYSE_TAXONNAAM)],
            [col(twn::NAME)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col(twn::STATUSCODE).is_null())
                .then(lit("unknown"))
                .when(
                    col(twn::STATUSCODE)
                        .cast(DataType::Int32)
                        .is_in(lit(valid_statuscodes()), false),
                )
                .then(lit("valid"))
                .when(col(twn::SYNONYMNAME).is_not_null())
                .then(lit("synonym"))
                .otherwise(lit("invalid"))
                .alias("Status"),
        )
        .select([
            col(observation::ANALYSE_TAXONNAAM),
            col("Status"),
            col(twn::SYNONYMNAME),
        ])
        .collect()?;

    Ok(classified)
}
