use std::collections::HashMap;

use polars::prelude::*;
use tracing::warn;

use crate::diagnostics::RowLedger;
use crate::error::{BenthosError, Result};
use crate::schema::{taxonomy, twn};

/// Per-taxon lookup entry used by the fixed-point loops.
struct TaxonEntry {
    parent: Option<String>,
    rank: Option<String>,
    order: Option<i32>,
}

/// Join the configured rank order onto the valid TWN taxa.
///
/// Every rank occurring in the TWN must be present in the rank-order table;
/// an unknown rank means the configuration is incomplete, which is fatal.
pub fn create_taxonomy(valid_twn: &DataFrame, rank_order: &DataFrame) -> Result<DataFrame> {
    let ledger = RowLedger::start("create_taxonomy", valid_twn);

    let taxonomy_df = valid_twn
        .select([twn::NAME, twn::PARENTNAME, twn::TAXONRANK])?
        .lazy()
        .join(
            rank_order.clone().lazy().with_column(
                col(taxonomy::ORDER).cast(DataType::Int32),
            ),
            [col(twn::TAXONRANK)],
            [col(twn::TAXONRANK)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let missing = taxonomy_df
        .clone()
        .lazy()
        .filter(col(taxonomy::ORDER).is_null())
        .collect()?;
    if missing.height() > 0 {
        let ranks = crate::twn::distinct_names(&missing, twn::TAXONRANK)?;
        return Err(BenthosError::ReferenceData(format!(
            "unknown taxonranks in the TWN, extend the rank-order configuration: {}",
            ranks.join(", ")
        )));
    }

    ledger.finish(&taxonomy_df)?;
    Ok(taxonomy_df)
}

fn taxonomy_map(taxonomy_df: &DataFrame) -> Result<HashMap<String, TaxonEntry>> {
    let names = taxonomy_df.column(twn::NAME)?.str()?;
    let parents = taxonomy_df.column(twn::PARENTNAME)?.str()?;
    let ranks = taxonomy_df.column(twn::TAXONRANK)?.str()?;
    let orders = taxonomy_df.column(taxonomy::ORDER)?.cast(&DataType::Int32)?;
    let orders = orders.i32()?;

    let mut map = HashMap::with_capacity(taxonomy_df.height());
    for i in 0..taxonomy_df.height() {
        let Some(name) = names.get(i) else { continue };
        map.insert(
            name.to_string(),
            TaxonEntry {
                parent: parents.get(i).map(str::to_string),
                rank: ranks.get(i).map(str::to_string),
                order: orders.get(i),
            },
        );
    }
    Ok(map)
}

/// Collapse every taxon ranked below species onto its owning species.
///
/// Each name climbs its parent links until the rank order reaches species
/// level or coarser; names already at or above species level map to
/// themselves. The climb is bounded by the taxon count, so cyclic parent
/// links fail loudly instead of spinning.
pub fn recode_subspecies(valid_twn: &DataFrame, taxonomy_df: &DataFrame) -> Result<DataFrame> {
    let ledger = RowLedger::start("recode_subspecies", valid_twn);
    let map = taxonomy_map(taxonomy_df)?;
    let max_depth = map.len() + 1;

    let names = valid_twn.column(twn::NAME)?.str()?;
    let mut twn_names: Vec<String> = Vec::with_capacity(valid_twn.height());
    let mut species_names: Vec<String> = Vec::with_capacity(valid_twn.height());

    for i in 0..valid_twn.height() {
        let Some(name) = names.get(i) else { continue };
        let mut current = name.to_string();

        let mut steps = 0;
        while let Some(entry) = map.get(&current) {
            let below_species = entry.order.is_some_and(|o| o < 1);
            match (&entry.parent, below_species) {
                (Some(parent), true) => current = parent.clone(),
                _ => break,
            }
            steps += 1;
            if steps > max_depth {
                return Err(BenthosError::CycleDetected(format!(
                    "subspecies collapse did not converge for '{name}'"
                )));
            }
        }

        twn_names.push(name.to_string());
        species_names.push(current);
    }

    let df = DataFrame::new(vec![
        Column::new(taxonomy::TWN_NAME.into(), &twn_names),
        Column::new(twn::NAME.into(), &species_names),
    ])?;
    ledger.finish(&df)?;
    Ok(df)
}

/// Stamp every collapsed taxon with its pipe-joined ancestor chain.
///
/// Fatal validations: a rank order below species level surviving to this
/// stage (the collapse did not converge), an unknown rank, and a finished
/// chain that does not reach the root.
pub fn glue_hierarchie(recoded: &DataFrame, taxonomy_df: &DataFrame) -> Result<DataFrame> {
    let ledger = RowLedger::start("glue_hierarchie", recoded);
    let map = taxonomy_map(taxonomy_df)?;
    let max_depth = map.len() + 1;

    let twn_names = recoded.column(taxonomy::TWN_NAME)?.str()?;
    let names = recoded.column(twn::NAME)?.str()?;

    let height = recoded.height();
    let mut out_twn: Vec<String> = Vec::with_capacity(height);
    let mut out_name: Vec<String> = Vec::with_capacity(height);
    let mut out_rank: Vec<String> = Vec::with_capacity(height);
    let mut out_order: Vec<i32> = Vec::with_capacity(height);
    let mut out_hierarchie: Vec<Option<String>> = Vec::with_capacity(height);
    let mut broken: Vec<String> = Vec::new();

    for i in 0..height {
        let (Some(twn_name), Some(name)) = (twn_names.get(i), names.get(i)) else {
            continue;
        };
        let entry = map.get(name);
        let (rank, order) = match entry {
            Some(TaxonEntry {
                rank: Some(rank),
                order: Some(order),
                ..
            }) => (rank.clone(), *order),
            _ => {
                return Err(BenthosError::ReferenceData(format!(
                    "unknown taxonrank for '{name}', extend the rank-order configuration"
                )))
            }
        };
        if order < 1 {
            return Err(BenthosError::ReferenceData(format!(
                "unexpected subspecies '{name}' while building the hierarchy"
            )));
        }

        // climb the parent chain, collecting ancestors up to the root
        let mut ancestors: Vec<String> = Vec::new();
        let mut current = name.to_string();
        while let Some(parent) = map.get(&current).and_then(|e| e.parent.clone()) {
            ancestors.push(parent.clone());
            current = parent;
            if ancestors.len() > max_depth {
                return Err(BenthosError::CycleDetected(format!(
                    "hierarchy for '{name}' exceeds the taxon count"
                )));
            }
        }

        if twn_name != twn::ROOT && !ancestors.iter().any(|a| a == twn::ROOT) {
            broken.push(twn_name.to_string());
        }

        out_twn.push(twn_name.to_string());
        out_name.push(name.to_string());
        out_rank.push(rank);
        out_order.push(order);
        out_hierarchie.push((!ancestors.is_empty()).then(|| ancestors.join("|")));
    }

    if !broken.is_empty() {
        return Err(BenthosError::ReferenceData(format!(
            "hierarchy does not reach '{}' for: {}",
            twn::ROOT,
            broken.join(", ")
        )));
    }

    let df = DataFrame::new(vec![
        Column::new(taxonomy::TWN_NAME.into(), &out_twn),
        Column::new(twn::NAME.into(), &out_name),
        Column::new(twn::TAXONRANK.into(), &out_rank),
        Column::new(taxonomy::ORDER.into(), &out_order),
        Column::new(taxonomy::HIERARCHIE.into(), &out_hierarchie),
    ])?;
    ledger.finish(&df)?;
    Ok(df)
}

/// Expand slash-combined taxon labels at the given rank into the `Combi`
/// column with pipe-joined alternatives.
///
/// Only genus and species combinations are defined; any other rank is a
/// configuration mistake that warns and leaves the frame untouched.
pub fn split_combined_taxa(hierarchie_df: &DataFrame, split_rank: &str) -> Result<DataFrame> {
    if split_rank != taxonomy::RANK_SPECIES_COMBI && split_rank != taxonomy::RANK_GENUS_COMBI {
        warn!(
            rank = split_rank,
            "no split logic defined for this taxonrank, combi column left untouched"
        );
        return Ok(hierarchie_df.clone());
    }

    let ledger = RowLedger::start("split_combined_taxa", hierarchie_df);

    let twn_names = hierarchie_df.column(taxonomy::TWN_NAME)?.str()?;
    let ranks = hierarchie_df.column(twn::TAXONRANK)?.str()?;

    let height = hierarchie_df.height();
    let mut combi: Vec<Option<String>> = match hierarchie_df.column(taxonomy::COMBI) {
        Ok(existing) => existing
            .str()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        Err(_) => vec![None; height],
    };

    for i in 0..height {
        let (Some(name), Some(rank)) = (twn_names.get(i), ranks.get(i)) else {
            continue;
        };
        if rank != split_rank || !name.contains('/') {
            continue;
        }

        if split_rank == taxonomy::RANK_GENUS_COMBI {
            combi[i] = Some(name.replace('/', "|"));
        } else {
            // species combi: re-prefix the later alternatives with the genus
            let Some(space) = name.find(' ') else { continue };
            let genus = &name[..space];
            combi[i] = Some(name.replace('/', &format!("|{genus} ")));
        }
    }

    let mut result = hierarchie_df.clone();
    result.with_column(Column::new(taxonomy::COMBI.into(), &combi))?;
    ledger.finish(&result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rank_order_frame;
    use pretty_assertions::assert_eq;

    fn rank_order() -> DataFrame {
        rank_order_frame(&[
            ("Forma", 0),
            ("Species", 1),
            ("SpeciesCombi", 1),
            ("Genus", 2),
            ("GenusCombi", 2),
            ("Familia", 3),
            ("Classis", 5),
            ("Phylum", 6),
            ("Regnum", 7),
        ])
        .unwrap()
    }

    fn valid_twn() -> DataFrame {
        df!(
            twn::NAME => [
                "Animalia", "Mollusca", "Bivalvia", "Semelidae", "Abra",
                "Abra alba", "Abra alba forma X",
                "Annelida", "Magelona", "Magelona johnstoni/filiformis",
                "Nephtys/Magelona",
            ],
            twn::PARENTNAME => [
                None, Some("Animalia"), Some("Mollusca"), Some("Bivalvia"), Some("Semelidae"),
                Some("Abra"), Some("Abra alba"),
                Some("Animalia"), Some("Annelida"), Some("Magelona"),
                Some("Annelida"),
            ],
            twn::TAXONRANK => [
                "Regnum", "Phylum", "Classis", "Familia", "Genus",
                "Species", "Forma",
                "Phylum", "Genus", "SpeciesCombi",
                "GenusCombi",
            ],
        )
        .unwrap()
    }

    fn taxonomy_fixture() -> DataFrame {
        create_taxonomy(&valid_twn(), &rank_order()).unwrap()
    }

    #[test]
    fn unknown_rank_is_fatal() {
        let twn_df = df!(
            twn::NAME => ["Animalia", "Abra"],
            twn::PARENTNAME => [None, Some("Animalia")],
            twn::TAXONRANK => ["Regnum", "Tribus"],
        )
        .unwrap();
        let err = create_taxonomy(&twn_df, &rank_order()).unwrap_err();
        assert!(matches!(err, BenthosError::ReferenceData(_)));
    }

    #[test]
    fn subspecies_collapse_to_their_owning_species() {
        let recoded = recode_subspecies(&valid_twn(), &taxonomy_fixture()).unwrap();
        let twn_names = recoded.column(taxonomy::TWN_NAME).unwrap().str().unwrap();
        let names = recoded.column(twn::NAME).unwrap().str().unwrap();

        for i in 0..recoded.height() {
            match twn_names.get(i).unwrap() {
                "Abra alba forma X" => assert_eq!(names.get(i), Some("Abra alba")),
                other => assert_eq!(names.get(i), Some(other), "species-or-coarser unchanged"),
            }
        }
    }

    #[test]
    fn collapse_is_idempotent() {
        let once = recode_subspecies(&valid_twn(), &taxonomy_fixture()).unwrap();
        // feed the collapsed names back in as if they were the raw list
        let as_twn = once
            .clone()
            .lazy()
            .select([col(twn::NAME)])
            .collect()
            .unwrap();
        let twice = recode_subspecies(&as_twn, &taxonomy_fixture()).unwrap();
        let names_once = once.column(twn::NAME).unwrap().str().unwrap();
        let names_twice = twice.column(twn::NAME).unwrap().str().unwrap();
        for i in 0..once.height() {
            assert_eq!(names_once.get(i), names_twice.get(i));
        }
    }

    #[test]
    fn hierarchy_reaches_the_root_exactly_once_without_artifacts() {
        let taxonomy_df = taxonomy_fixture();
        let recoded = recode_subspecies(&valid_twn(), &taxonomy_df).unwrap();
        let glued = glue_hierarchie(&recoded, &taxonomy_df).unwrap();

        let twn_names = glued.column(taxonomy::TWN_NAME).unwrap().str().unwrap();
        let hier = glued.column(taxonomy::HIERARCHIE).unwrap().str().unwrap();
        for i in 0..glued.height() {
            let twn_name = twn_names.get(i).unwrap();
            match hier.get(i) {
                Some(h) => {
                    assert_eq!(h.matches(twn::ROOT).count(), 1, "{twn_name}: {h}");
                    assert!(!h.contains("nan"));
                    assert!(!h.starts_with('|'));
                    assert!(!h.contains("||"));
                }
                None => assert_eq!(twn_name, twn::ROOT),
            }
        }
    }

    #[test]
    fn hierarchy_of_a_species_lists_ancestors_in_order() {
        let taxonomy_df = taxonomy_fixture();
        let recoded = recode_subspecies(&valid_twn(), &taxonomy_df).unwrap();
        let glued = glue_hierarchie(&recoded, &taxonomy_df).unwrap();

        let twn_names = glued.column(taxonomy::TWN_NAME).unwrap().str().unwrap();
        let hier = glued.column(taxonomy::HIERARCHIE).unwrap().str().unwrap();
        let row = (0..glued.height())
            .find(|&i| twn_names.get(i) == Some("Abra alba"))
            .unwrap();
        assert_eq!(
            hier.get(row),
            Some("Abra|Semelidae|Bivalvia|Mollusca|Animalia")
        );
    }

    #[test]
    fn broken_parent_chain_is_fatal() {
        // Bivalvia's parent is missing from the taxonomy, so Abra alba
        // never reaches Animalia
        let twn_df = df!(
            twn::NAME => ["Animalia", "Abra", "Abra alba"],
            twn::PARENTNAME => [None, Some("Bivalvia"), Some("Abra")],
            twn::TAXONRANK => ["Regnum", "Genus", "Species"],
        )
        .unwrap();
        let taxonomy_df = create_taxonomy(&twn_df, &rank_order()).unwrap();
        let recoded = recode_subspecies(&twn_df, &taxonomy_df).unwrap();
        let err = glue_hierarchie(&recoded, &taxonomy_df).unwrap_err();
        assert!(matches!(err, BenthosError::ReferenceData(_)));
    }

    #[test]
    fn surviving_subspecies_rank_is_fatal() {
        let twn_df = df!(
            twn::NAME => ["Animalia", "Abra alba forma X"],
            twn::PARENTNAME => [None, Some("Animalia")],
            twn::TAXONRANK => ["Regnum", "Forma"],
        )
        .unwrap();
        let taxonomy_df = create_taxonomy(&twn_df, &rank_order()).unwrap();
        // bypass the collapse on purpose: identity mapping straight into glue
        let recoded = df!(
            taxonomy::TWN_NAME => ["Abra alba forma X"],
            twn::NAME => ["Abra alba forma X"],
        )
        .unwrap();
        let err = glue_hierarchie(&recoded, &taxonomy_df).unwrap_err();
        assert!(matches!(err, BenthosError::ReferenceData(_)));
    }

    #[test]
    fn genus_combi_splits_on_slash() {
        let taxonomy_df = taxonomy_fixture();
        let recoded = recode_subspecies(&valid_twn(), &taxonomy_df).unwrap();
        let glued = glue_hierarchie(&recoded, &taxonomy_df).unwrap();
        let split = split_combined_taxa(&glued, taxonomy::RANK_GENUS_COMBI).unwrap();

        let twn_names = split.column(taxonomy::TWN_NAME).unwrap().str().unwrap();
        let combi = split.column(taxonomy::COMBI).unwrap().str().unwrap();
        let row = (0..split.height())
            .find(|&i| twn_names.get(i) == Some("Nephtys/Magelona"))
            .unwrap();
        assert_eq!(combi.get(row), Some("Nephtys|Magelona"));
    }

    #[test]
    fn species_combi_reprefixes_the_genus() {
        let taxonomy_df = taxonomy_fixture();
        let recoded = recode_subspecies(&valid_twn(), &taxonomy_df).unwrap();
        let glued = glue_hierarchie(&recoded, &taxonomy_df).unwrap();
        let split = split_combined_taxa(&glued, taxonomy::RANK_SPECIES_COMBI).unwrap();

        let twn_names = split.column(taxonomy::TWN_NAME).unwrap().str().unwrap();
        let combi = split.column(taxonomy::COMBI).unwrap().str().unwrap();
        let row = (0..split.height())
            .find(|&i| twn_names.get(i) == Some("Magelona johnstoni/filiformis"))
            .unwrap();
        assert_eq!(combi.get(row), Some("Magelona johnstoni|Magelona filiformis"));
    }

    #[test]
    fn unsupported_split_rank_is_a_warned_noop() {
        let taxonomy_df = taxonomy_fixture();
        let recoded = recode_subspecies(&valid_twn(), &taxonomy_df).unwrap();
        let glued = glue_hierarchie(&recoded, &taxonomy_df).unwrap();
        let split = split_combined_taxa(&glued, "FamilyCombi").unwrap();
        assert_eq!(split.shape(), glued.shape());
    }
}
