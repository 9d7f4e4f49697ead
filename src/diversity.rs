use std::collections::{HashMap, HashSet};

use polars::prelude::*;
use tracing::warn;

use crate::config::DiversityLevel;
use crate::diagnostics::{verify_sum_conserved, RowLedger};
use crate::error::{BenthosError, Result};
use crate::schema::{diversity, observation, taxonomy};

/// Wrap every pipe-separated segment of a label in dashes, so a taxon name
/// can be looked up in a hierarchy string without matching inside a longer
/// name ("-Abra-" never matches "-Abra alba-").
fn wrap_segments(value: &str) -> String {
    value
        .split('|')
        .map(|v| format!("-{v}-"))
        .collect::<Vec<_>>()
        .join("|")
}

/// True when any segment of the wrapped label occurs in the wrapped
/// hierarchy string. Combi labels carry multiple segments, one match counts.
fn contains_any(label: &str, hierarchie: &str) -> bool {
    label.split('|').any(|segment| hierarchie.contains(segment))
}

fn str_values<'a>(df: &'a DataFrame, column: &str) -> Result<Vec<Option<String>>> {
    let casted = df.column(column)?.cast(&DataType::String)?;
    let ca = casted.str()?;
    Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn opt_str_values(df: &DataFrame, column: &str) -> Result<Vec<Option<String>>> {
    if df.schema().contains(column) {
        str_values(df, column)
    } else {
        Ok(vec![None; df.height()])
    }
}

fn f64_values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>> {
    let casted = df.column(column)?.cast(&DataType::Float64)?;
    let ca = casted.f64()?;
    Ok(ca.into_iter().collect())
}

fn i32_values(df: &DataFrame, column: &str) -> Result<Vec<Option<i32>>> {
    let casted = df.column(column)?.cast(&DataType::Int32)?;
    let ca = casted.i32()?;
    Ok(ca.into_iter().collect())
}

/// One composite grouping key per row, built from the configured columns.
/// Null cells keep rows grouped together instead of dropping them.
fn group_keys(df: &DataFrame, columns: &[String]) -> Result<Vec<String>> {
    let mut parts: Vec<Vec<Option<String>>> = Vec::with_capacity(columns.len());
    for column in columns {
        parts.push(str_values(df, column)?);
    }

    let mut keys = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let key = parts
            .iter()
            .map(|part| part[i].as_deref().unwrap_or("<null>"))
            .collect::<Vec<_>>()
            .join("\u{1}");
        keys.push(key);
    }
    Ok(keys)
}

/// Per-row matching labels for trend observations: the combi label when the
/// taxon is a combination, its analysis name otherwise, plus the hierarchy
/// string extended with the label itself.
struct TaxonLabels {
    label: Vec<Option<String>>,
    hierarchie: Vec<Option<String>>,
}

fn taxon_labels(df: &DataFrame, trend: &[bool]) -> Result<TaxonLabels> {
    let analyse = str_values(df, observation::ANALYSE_TAXONNAAM)?;
    let combi = opt_str_values(df, taxonomy::COMBI)?;
    let hierarchie = opt_str_values(df, taxonomy::HIERARCHIE)?;

    let mut labels = vec![None; df.height()];
    let mut hierarchies = vec![None; df.height()];
    for i in 0..df.height() {
        if !trend[i] {
            continue;
        }
        let Some(name) = combi[i].as_deref().or(analyse[i].as_deref()) else {
            continue;
        };
        let extended = match hierarchie[i].as_deref() {
            Some(h) => format!("{name}|{h}"),
            None => name.to_string(),
        };
        labels[i] = Some(wrap_segments(name));
        hierarchies[i] = Some(wrap_segments(&extended));
    }

    Ok(TaxonLabels {
        label: labels,
        hierarchie: hierarchies,
    })
}

fn trend_flags(df: &DataFrame) -> Result<Vec<bool>> {
    let gebruik = str_values(df, observation::GEBRUIK)?;
    let trend: Vec<bool> = gebruik
        .iter()
        .map(|v| v.as_deref() == Some(observation::GEBRUIK_TREND))
        .collect();
    if trend.iter().any(|&t| t) {
        Ok(trend)
    } else {
        Err(BenthosError::InvalidData(
            "no trend samples present".to_string(),
        ))
    }
}

/// Mark, for every configured level, the taxa that count as species-level
/// observations. All species-rank taxa count; a coarser determination only
/// counts when no already-counted taxon in the same level group sits below
/// it in the taxonomic hierarchy.
pub fn mark_diversity_species(
    df: &DataFrame,
    levels: &[DiversityLevel],
) -> Result<DataFrame> {
    let ledger = RowLedger::start("mark_diversity_species", df);

    let trend = trend_flags(df)?;
    let labels = taxon_labels(df, &trend)?;
    let orders = i32_values(df, taxonomy::ORDER)?;
    let max_rank = orders
        .iter()
        .zip(&trend)
        .filter(|(_, &t)| t)
        .filter_map(|(o, _)| *o)
        .max()
        .unwrap_or(1);

    let mut result = df.clone();
    for level in levels {
        let keys = group_keys(df, &level.group_columns)?;
        let mut marked = vec![false; df.height()];

        // every species-rank determination counts
        for i in 0..df.height() {
            if trend[i] && orders[i].is_some_and(|o| o <= 1) {
                marked[i] = true;
            }
        }

        // walk the coarser ranks upward, marking only lineages not already
        // covered by a finer determination in the same group
        for rank in 2..=max_rank {
            let mut candidates: HashSet<(&str, &str)> = HashSet::new();
            for i in 0..df.height() {
                if trend[i] && orders[i] == Some(rank) {
                    if let Some(label) = labels.label[i].as_deref() {
                        candidates.insert((keys[i].as_str(), label));
                    }
                }
            }
            if candidates.is_empty() {
                continue;
            }

            let mut covered_hierarchies: HashMap<&str, Vec<&str>> = HashMap::new();
            for i in 0..df.height() {
                if marked[i] {
                    if let Some(hier) = labels.hierarchie[i].as_deref() {
                        covered_hierarchies
                            .entry(keys[i].as_str())
                            .or_default()
                            .push(hier);
                    }
                }
            }

            let new_taxa: HashSet<(&str, &str)> = candidates
                .into_iter()
                .filter(|(key, label)| {
                    !covered_hierarchies
                        .get(key)
                        .is_some_and(|hiers| hiers.iter().any(|h| contains_any(label, h)))
                })
                .collect();

            for i in 0..df.height() {
                if trend[i] && orders[i] == Some(rank) {
                    if let Some(label) = labels.label[i].as_deref() {
                        marked[i] = new_taxa.contains(&(keys[i].as_str(), label));
                    }
                }
            }
        }

        let column_name = diversity::is_soort_column(&level.name);
        result.with_column(Column::new(column_name.into(), &marked))?;
    }

    if df.schema().contains(observation::DICHTHEID_AANTAL) {
        verify_sum_conserved(
            "mark_diversity_species",
            df,
            &result,
            observation::DICHTHEID_AANTAL,
        )?;
    }
    ledger.finish(&result)?;
    Ok(result)
}

struct ParentShare {
    factor: f64,
    even_split: bool,
}

/// Redistribute abundances recorded against non-species determinations over
/// the species actually observed in the same level group.
///
/// A parent's total is handed out pro rata over the abundances of its
/// descendant species. When none of those species carries an abundance the
/// total is split evenly over them instead. Parents without any matching
/// species keep their abundance unredistributed, which the per waterbody
/// drift warning surfaces.
pub fn distribute_taxa_abundances(
    df: &DataFrame,
    levels: &[DiversityLevel],
    abundance_field: &str,
    prefix: &str,
) -> Result<DataFrame> {
    let ledger = RowLedger::start("distribute_taxa_abundances", df);

    let trend = trend_flags(df)?;
    let labels = taxon_labels(df, &trend)?;
    let analyse = str_values(df, observation::ANALYSE_TAXONNAAM)?;
    let abundance = f64_values(df, abundance_field)?;

    let mut result = df.clone();
    for level in levels {
        let keys = group_keys(df, &level.group_columns)?;
        let soort_column = diversity::is_soort_column(&level.name);
        let marks = df.column(&soort_column)?.bool()?;
        let marked: Vec<bool> = (0..df.height())
            .map(|i| marks.get(i).unwrap_or(false))
            .collect();

        // parent totals per group, keyed by the wrapped parent label
        let mut sum_parents: HashMap<(&str, &str), f64> = HashMap::new();
        for i in 0..df.height() {
            if trend[i] && !marked[i] {
                if let Some(label) = labels.label[i].as_deref() {
                    *sum_parents.entry((keys[i].as_str(), label)).or_insert(0.0) +=
                        abundance[i].unwrap_or(0.0);
                }
            }
        }

        // species totals and hierarchy per group, keyed by analysis name
        let mut species: HashMap<(&str, &str), (&str, f64)> = HashMap::new();
        for i in 0..df.height() {
            if trend[i] && marked[i] {
                let (Some(name), Some(hier)) =
                    (analyse[i].as_deref(), labels.hierarchie[i].as_deref())
                else {
                    continue;
                };
                let entry = species.entry((keys[i].as_str(), name)).or_insert((hier, 0.0));
                entry.1 += abundance[i].unwrap_or(0.0);
            }
        }

        // resolve each parent to its matching species and derive the factor
        let mut shares: HashMap<(&str, &str), Vec<ParentShare>> = HashMap::new();
        for (&(group, parent), &parent_sum) in &sum_parents {
            let matched: Vec<(&str, f64)> = species
                .iter()
                .filter(|((g, _), (hier, _))| *g == group && contains_any(parent, hier))
                .map(|((_, name), (_, sum))| (*name, *sum))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let sum_childs: f64 = matched.iter().map(|(_, s)| s).sum();
            let even_split = sum_childs == 0.0;
            let factor = if even_split {
                parent_sum / matched.len() as f64
            } else {
                parent_sum / sum_childs
            };
            for (name, _) in matched {
                shares
                    .entry((group, name))
                    .or_default()
                    .push(ParentShare { factor, even_split });
            }
        }

        let mut distributed: Vec<Option<f64>> = vec![None; df.height()];
        for i in 0..df.height() {
            if !(trend[i] && marked[i]) {
                continue;
            }
            let own = abundance[i].unwrap_or(0.0);
            let mut value = own;
            if let Some(name) = analyse[i].as_deref() {
                if let Some(parent_shares) = shares.get(&(keys[i].as_str(), name)) {
                    for share in parent_shares {
                        value += if share.even_split {
                            share.factor
                        } else {
                            own * share.factor
                        };
                    }
                }
            }
            distributed[i] = Some(value);
        }

        warn_on_group_drift(df, &trend, &abundance, &distributed, abundance_field, level)?;

        let column_name = diversity::distributed_column(prefix, &level.name);
        result.with_column(Column::new(column_name.into(), &distributed))?;
    }

    verify_sum_conserved("distribute_taxa_abundances", df, &result, abundance_field)?;
    ledger.finish(&result)?;
    Ok(result)
}

/// Compare the distributed totals against the raw abundance per waterbody,
/// year and season. Drift below a whole unit is rounding; anything above it
/// usually means parents without observed descendant species.
fn warn_on_group_drift(
    df: &DataFrame,
    trend: &[bool],
    abundance: &[Option<f64>],
    distributed: &[Option<f64>],
    abundance_field: &str,
    level: &DiversityLevel,
) -> Result<()> {
    let report_columns = [
        observation::WATERLICHAAM,
        observation::MONSTERJAAR,
        observation::SEIZOEN,
    ];
    if !report_columns.iter().all(|c| df.schema().contains(c)) {
        return Ok(());
    }
    let report_columns: Vec<String> = report_columns.iter().map(|c| c.to_string()).collect();
    let keys = group_keys(df, &report_columns)?;

    let mut totals: HashMap<&str, (f64, f64)> = HashMap::new();
    for i in 0..df.height() {
        if !trend[i] {
            continue;
        }
        let entry = totals.entry(keys[i].as_str()).or_insert((0.0, 0.0));
        entry.0 += abundance[i].unwrap_or(0.0);
        entry.1 += distributed[i].unwrap_or(0.0);
    }

    for (key, (raw, dist)) in totals {
        let diff = raw - dist;
        if diff.abs() >= 1.0 {
            warn!(
                level = %level.name,
                group = %key.replace('\u{1}', "/"),
                difference = diff,
                "distributed abundances drift from {abundance_field}"
            );
        }
    }
    Ok(())
}
