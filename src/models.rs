use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Reads a present key as `Some`, `null` included, so a partial update can
/// tell "clear this field" (`Some(None)`) from "leave it" (`None`).
/// Use together with `#[serde(default)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// --- Belege ---

pub const FACSIMILE_BASE_URL: &str = "https://walk-want-grew-imgs.acdh-dev.oeaw.ac.at/iiif/images/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facsimile {
    pub id: i64,
    pub file_name: String,
}

impl Facsimile {
    pub fn sanitize_file_name(&self) -> String {
        self.file_name.replace("%2F", "/")
    }

    pub fn facs_url(&self) -> String {
        format!("{}{}/info.json", FACSIMILE_BASE_URL, self.sanitize_file_name())
    }

    pub fn preview_url(&self) -> String {
        format!(
            "{}{}/full/600,/0/default.jpg",
            FACSIMILE_BASE_URL,
            self.sanitize_file_name()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BelegFacs {
    pub id: i64,
    pub beleg: String,
    pub facsimile: i64,
    pub resp: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A dictionary attestation (`tei:entry`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Beleg {
    pub dboe_id: String,
    pub orig_xml: Option<String>,
    pub xeno_data: Option<String>,
    pub hauptlemma: Option<String>,
    pub nebenlemma: Option<String>,
    pub archivzeile: Option<String>,
    pub quelle: Option<String>,
    pub quelle_page: Option<String>,
    pub quelle_bearbeitet: Option<String>,
    pub bibl: Option<String>,
    pub zitierweise: Vec<String>,
    pub pos: Option<String>,
    pub ref_type_dbo: Option<String>,
    pub ref_type_sni: Option<String>,
    pub xr_type_verweise_o: Option<String>,
    pub xr_type_verweise_b: Option<String>,
    pub fragebogen_nummer: Option<String>,
    pub etym: Vec<String>,
    pub note_notabene: Vec<String>,
    pub note_diverse: Vec<String>,
    pub import_issue: bool,
}

impl Beleg {
    pub fn new(dboe_id: impl Into<String>, orig_xml: Option<String>) -> Self {
        Beleg {
            dboe_id: dboe_id.into(),
            orig_xml,
            ..Default::default()
        }
    }
}

impl std::fmt::Display for Beleg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.hauptlemma {
            Some(hl) => write!(f, "{} ({})", self.dboe_id, hl),
            None => write!(f, "{}", self.dboe_id),
        }
    }
}

/// A `tei:cit` node ("Kontext").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub dboe_id: String,
    pub beleg: String,
    pub number: i64,
    pub orig_xml: String,
    pub quote_lang: Option<String>,
    pub quote_text: Option<String>,
    pub quote_gram: Option<String>,
    pub p_ref: Option<String>,
    pub definition: Option<String>,
    pub definition_lang: Option<String>,
    pub corresp: Option<String>,
    pub definition_corresp: Option<String>,
    pub interpration: Option<String>,
    pub note_anmerkung_o: Option<String>,
    pub note_anmerkung_b: Option<String>,
    pub fragebogen_nummer: Option<String>,
    pub xr: Option<String>,
    pub note_diverse: Vec<String>,
}

/// A `tei:re` node below a citation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZusatzLemma {
    pub dboe_id: String,
    pub citation: String,
    pub number: i64,
    pub orig_xml: String,
    pub form_orth: Option<String>,
    pub pos: Option<String>,
    pub gram: Option<String>,
}

/// NLP output attached to a citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KontextAnnotation {
    pub id: i64,
    pub kontext: String,
    pub payload: Option<Value>,
    pub tool: Option<String>,
    pub source_field: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A `tei:form` pronunciation node, used for both Lautung and Lehnwort rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormVariant {
    pub dboe_id: String,
    pub beleg: String,
    pub number: i64,
    pub orig_xml: String,
    pub pron: Option<String>,
    pub pron_lang: Option<String>,
    pub pron_gram: Option<String>,
}

pub type Lautung = FormVariant;
pub type LehnWort = FormVariant;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnmerkungLautung {
    pub dboe_id: String,
    pub beleg: String,
    pub number: i64,
    pub resp: Resp,
    pub corresp_to: Option<String>,
    pub content: Option<String>,
    pub p_ref: Vec<String>,
}

/// A `tei:sense` node ("Bedeutung").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sense {
    pub dboe_id: String,
    pub beleg: String,
    pub number: i64,
    pub orig_xml: String,
    pub definition: Option<String>,
    pub corresp_to: Option<String>,
    pub definition_lang: Option<String>,
    pub note_anmerkung_o: Option<String>,
    pub note_anmerkung_b: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resp {
    #[default]
    O,
    B,
}

// --- Siglen ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigleKind {
    Bl,  // Bundesland
    Gr,  // Großregion
    Kr,  // Kleinregion
    Ort, // Ort
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sigle {
    pub sigle: String,
    pub name: String,
    #[serde(default)]
    pub orig_names: Vec<String>,
    pub kind: SigleKind,
    #[serde(default)]
    pub coordinates: Option<Value>,
    #[serde(default)]
    pub geonames: Option<String>,
    #[serde(default)]
    pub bl: Option<String>,
    #[serde(default)]
    pub gr: Option<String>,
    #[serde(default)]
    pub kr: Option<String>,
}

impl Sigle {
    pub fn new(sigle: impl Into<String>, name: impl Into<String>, kind: SigleKind) -> Self {
        Sigle {
            sigle: sigle.into(),
            name: name.into(),
            orig_names: Vec::new(),
            kind,
            coordinates: None,
            geonames: None,
            bl: None,
            gr: None,
            kr: None,
        }
    }

    /// Removes duplicate original names, keeping first occurrences.
    pub fn dedup_orig_names(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.orig_names.retain(|n| seen.insert(n.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BelegSigle {
    pub id: i64,
    pub beleg: String,
    pub sigle: String,
    pub corresp: Option<String>,
    pub resp: Option<String>,
}

// --- Annotations / editorial ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub date_joined: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub notation: String,
}

/// Category names a collection may be filed under.
pub const COLLECTION_CATEGORIES: [&str; 6] = [
    "distribution",
    "sense",
    "multi_word_expression",
    "etymology",
    "compound",
    "lemma",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EsDocument {
    pub id: i64,
    pub es_id: String,
    pub index: Option<String>,
    pub version: Option<i64>,
    pub tag: Vec<i64>,
    pub scans: Option<Vec<String>>,
    pub xml: String,
    pub xml_modified_by: Option<i64>,
    pub xml_error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lemma {
    pub id: i64,
    pub norm: Option<String>,
    pub org: String,
    pub lemmatisierung: Option<String>,
    pub filename: String,
    pub count: i64,
    pub comment: String,
    pub simplex: Option<i64>,
    pub suggestion: Option<String>,
    pub pos: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    ArtikelInArbeit,
    ArtikelErstellt,
    LautkommentarErstellt,
    #[serde(rename = "LAUTKOMMENTAR_HINZUGEFÜGT")]
    LautkommentarHinzugefuegt,
    Irrelevant,
    FreigegebenFuerLk,
    FreigegebenFuerVorarbeiten,
    VerbreitugsCollectionErstellt,
    Zugewiesen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Draft,
    PeerCorrection,
    InternalCorrection,
    ExternalCorrection,
    Online,
    FinalVersion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOfArticle {
    pub id: i64,
    pub begin_time: DateTime<Utc>,
    pub step: Step,
    pub status: Status,
    pub finished_date: Option<DateTime<Utc>>,
    pub description: String,
    pub current: bool,
    pub deadline: Option<DateTime<Utc>>,
    pub last_edited: DateTime<Utc>,
    pub user: Option<i64>,
    pub lemma: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_by: Option<i64>,
    pub category: Option<i64>,
    pub lemma_id: Option<i64>,
    pub es_document: Vec<i64>,
    pub comment: String,
    pub curator: Vec<i64>,
    pub public: bool,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub title: String,
    pub collection: Option<i64>,
    pub description: String,
    pub category: Option<i64>,
    pub public: bool,
    pub created_by: Option<i64>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutorArtikel {
    pub id: i64,
    pub lemma_id: Option<i64>,
    pub bearbeiter_id: Option<i64>,
}

// --- Enum <-> string, mirrors the stored representation ---

impl std::fmt::Display for Resp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Resp::O => "O",
            Resp::B => "B",
        })
    }
}

impl std::str::FromStr for Resp {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "O" => Ok(Resp::O),
            "B" => Ok(Resp::B),
            _ => Err(format!("Invalid resp: {}", s)),
        }
    }
}

impl SigleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigleKind::Bl => "bl",
            SigleKind::Gr => "gr",
            SigleKind::Kr => "kr",
            SigleKind::Ort => "ort",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SigleKind::Bl => "Bundesland",
            SigleKind::Gr => "Großregion",
            SigleKind::Kr => "Kleinregion",
            SigleKind::Ort => "Ort",
        }
    }
}

impl std::str::FromStr for SigleKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bl" => Ok(SigleKind::Bl),
            "gr" => Ok(SigleKind::Gr),
            "kr" => Ok(SigleKind::Kr),
            "ort" => Ok(SigleKind::Ort),
            _ => Err(format!("Invalid sigle kind: {}", s)),
        }
    }
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::ArtikelInArbeit,
        Step::ArtikelErstellt,
        Step::LautkommentarErstellt,
        Step::LautkommentarHinzugefuegt,
        Step::Irrelevant,
        Step::FreigegebenFuerLk,
        Step::FreigegebenFuerVorarbeiten,
        Step::VerbreitugsCollectionErstellt,
        Step::Zugewiesen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ArtikelInArbeit => "ARTIKEL_IN_ARBEIT",
            Step::ArtikelErstellt => "ARTIKEL_ERSTELLT",
            Step::LautkommentarErstellt => "LAUTKOMMENTAR_ERSTELLT",
            Step::LautkommentarHinzugefuegt => "LAUTKOMMENTAR_HINZUGEFÜGT",
            Step::Irrelevant => "IRRELEVANT",
            Step::FreigegebenFuerLk => "FREIGEGEBEN_FUER_LK",
            Step::FreigegebenFuerVorarbeiten => "FREIGEGEBEN_FUER_VORARBEITEN",
            Step::VerbreitugsCollectionErstellt => "VERBREITUGS_COLLECTION_ERSTELLT",
            Step::Zugewiesen => "ZUGEWIESEN",
        }
    }

    /// Human readable label shown to editors.
    pub fn label(&self) -> &'static str {
        match self {
            Step::ArtikelInArbeit => "Artikel in Arbeit",
            Step::ArtikelErstellt => "Artikel erstellt",
            Step::LautkommentarErstellt => "Lautkommentar erstellt",
            Step::LautkommentarHinzugefuegt => "Lautkommentar hinzugefügt",
            Step::Irrelevant => "Irrelevant",
            Step::FreigegebenFuerLk => "Freigegeben für Lautkommentar",
            Step::FreigegebenFuerVorarbeiten => "Freigegeben für Vorarbeiten",
            Step::VerbreitugsCollectionErstellt => "Verbreitungs-Collection erstellt",
            Step::Zugewiesen => "Zugewiesen",
        }
    }
}

impl std::str::FromStr for Step {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("Invalid step: {}", s))
    }
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Draft,
        Status::PeerCorrection,
        Status::InternalCorrection,
        Status::ExternalCorrection,
        Status::Online,
        Status::FinalVersion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "DRAFT",
            Status::PeerCorrection => "PEER_CORRECTION",
            Status::InternalCorrection => "INTERNAL_CORRECTION",
            Status::ExternalCorrection => "EXTERNAL_CORRECTION",
            Status::Online => "ONLINE",
            Status::FinalVersion => "FINAL_VERSION",
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid status: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facsimile_urls() {
        let facs = Facsimile {
            id: 1,
            file_name: "tu%2F1234.jpg".to_string(),
        };
        assert_eq!(
            facs.facs_url(),
            "https://walk-want-grew-imgs.acdh-dev.oeaw.ac.at/iiif/images/tu/1234.jpg/info.json"
        );
        assert!(facs.preview_url().ends_with("tu/1234.jpg/full/600,/0/default.jpg"));
    }

    #[test]
    fn test_step_status_round_trip_through_serde() {
        let json = serde_json::to_string(&Step::LautkommentarHinzugefuegt).unwrap();
        assert_eq!(json, "\"LAUTKOMMENTAR_HINZUGEFÜGT\"");
        assert_eq!("FINAL_VERSION".parse::<Status>(), Ok(Status::FinalVersion));
        assert_eq!(
            serde_json::from_str::<Step>("\"FREIGEGEBEN_FUER_LK\"").unwrap(),
            Step::FreigegebenFuerLk
        );
    }

    #[test]
    fn test_sigle_orig_names_dedup_keeps_order() {
        let mut sigle = Sigle::new("1A01", "Wien", SigleKind::Ort);
        sigle.orig_names = vec!["Wean".into(), "Wien".into(), "Wean".into()];
        sigle.dedup_orig_names();
        assert_eq!(sigle.orig_names, vec!["Wean".to_string(), "Wien".to_string()]);
    }

    #[test]
    fn test_beleg_display() {
        let mut beleg = Beleg::new("b1", None);
        assert_eq!(beleg.to_string(), "b1");
        beleg.hauptlemma = Some("Haus".into());
        assert_eq!(beleg.to_string(), "b1 (Haus)");
    }
}
