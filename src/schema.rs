//! Column-name constants for the benthos-taxonkit tables.
//! Single source of truth for every frame flowing through the core.

// ── TWN reference list columns ──────────────────────────────────────────────
pub mod twn {
    pub const NAME: &str = "Name";
    pub const PARENTNAME: &str = "Parentname";
    pub const TAXONRANK: &str = "Taxonrank";
    pub const STATUSCODE: &str = "Statuscode";
    pub const SYNONYMNAME: &str = "Synonymname";
    pub const TAXONGROUP_CODE: &str = "Taxongroup_code";

    /// The root of the reference taxonomy. The only taxon allowed a null parent.
    pub const ROOT: &str = "Animalia";

    /// Statuscodes counted as valid taxa.
    pub const VALID_STATUSCODES: [i32; 2] = [10, 80];
    /// Statuscodes for invalid taxa that must carry a synonym.
    pub const SYNONYM_STATUSCODES: [i32; 2] = [20, 30];
}

// ── Derived taxonomy columns ────────────────────────────────────────────────
pub mod taxonomy {
    /// Integer rank order: species = 1, below species < 1, coarser > 1.
    pub const ORDER: &str = "Order";
    /// The originally reported TWN name, before subspecies collapsing.
    pub const TWN_NAME: &str = "Twn_name";
    /// Pipe-joined ancestor chain, from direct parent up to the root.
    pub const HIERARCHIE: &str = "Hierarchie";
    /// Pipe-joined alternatives for slash-combined taxon labels.
    pub const COMBI: &str = "Combi";

    pub const RANK_SPECIES_COMBI: &str = "SpeciesCombi";
    pub const RANK_GENUS_COMBI: &str = "GenusCombi";
}

// ── Protocol mapping columns ────────────────────────────────────────────────
pub mod mapping {
    /// Aggregate override produced by a hierarchy build.
    pub const OVERRULE_TAXONNAME: &str = "Overrule_taxonname";
    /// Contra override: exception carved out of an aggregate subtree.
    pub const CONTRA_TAXONNAME: &str = "Contra_taxonname";

    /// Suffixes combined with a protocol prefix ("Zoet"/"Zout").
    pub const OVERRULE_SUFFIX: &str = "overrule_taxonname";
    pub const PRESENTIE_SUFFIX: &str = "protocol_presentie";
    pub const BIOMASSA_SUFFIX: &str = "protocol_biomassa";
}

// ── Observation columns ─────────────────────────────────────────────────────
pub mod observation {
    pub const COLLECTIE_REFERENTIE: &str = "Collectie_Referentie";
    pub const PARAMETER_SPECIFICATIE: &str = "Parameter_Specificatie";
    pub const DETERMINATIE_PROTOCOL: &str = "Determinatie_protocol";
    pub const BIOMASSA_PROTOCOL: &str = "Biomassa_protocol";
    pub const GEBRUIK: &str = "Gebruik";
    pub const ANALYSE_TAXONNAAM: &str = "Analyse_taxonnaam";
    pub const OVERRULE_SUBSPECIESNAME: &str = "Overrule_subspeciesname";
    pub const IS_PRESENTIE_PROTOCOL: &str = "IsPresentie_Protocol";
    pub const IS_BIOMASSA_PROTOCOL: &str = "IsBiomassa_Protocol";

    pub const WATERLICHAAM: &str = "Waterlichaam";
    pub const MONSTERJAAR: &str = "Monsterjaar";
    pub const SEIZOEN: &str = "Seizoen";

    pub const AANTAL: &str = "Aantal";
    pub const DICHTHEID_AANTAL: &str = "Dichtheid_Aantal";

    /// `Gebruik` value marking the samples that take part in diversity analysis.
    pub const GEBRUIK_TREND: &str = "trend";

    /// `Determinatie_protocol` / `Biomassa_protocol` row values.
    pub const PROTOCOL_ZOET: &str = "zoet";
    pub const PROTOCOL_ZOUT: &str = "zout";
}

// ── Diversity columns ───────────────────────────────────────────────────────
pub mod diversity {
    /// Per-level species-membership flag column.
    pub fn is_soort_column(level: &str) -> String {
        format!("IsSoort_{level}")
    }

    /// Per-level distributed abundance column.
    pub fn distributed_column(prefix: &str, level: &str) -> String {
        format!("{prefix}_{level}")
    }
}
