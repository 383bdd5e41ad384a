//! TEI → relational field extraction.
//!
//! Every TEI-backed record declares a table of fields and the xpath that
//! fills each of them. Populating a record only touches fields that are
//! still empty, so values edited after import survive a re-save.

use crate::error::Result;
use crate::models::{AnmerkungLautung, Beleg, Citation, FormVariant, Resp, Sense, ZusatzLemma};
use crate::tei::{self, Element};
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Fulltext of the first matching node.
    Text,
    /// Value of the first matching attribute.
    Attribute,
    /// Fulltext of every matching node.
    List,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub xpath: &'static str,
    pub kind: FieldKind,
    /// Values longer than this are truncated and the record is flagged.
    pub max_len: Option<usize>,
}

const fn text(name: &'static str, xpath: &'static str) -> FieldSpec {
    FieldSpec { name, xpath, kind: FieldKind::Text, max_len: None }
}

const fn char_field(name: &'static str, xpath: &'static str) -> FieldSpec {
    FieldSpec { name, xpath, kind: FieldKind::Text, max_len: Some(250) }
}

const fn attribute(name: &'static str, xpath: &'static str, max_len: usize) -> FieldSpec {
    FieldSpec { name, xpath, kind: FieldKind::Attribute, max_len: Some(max_len) }
}

const fn list(name: &'static str, xpath: &'static str) -> FieldSpec {
    FieldSpec { name, xpath, kind: FieldKind::List, max_len: None }
}

/// A record whose columns are (partly) derived from its `orig_xml`.
pub trait TeiBacked {
    fn fields() -> &'static [FieldSpec];
    fn text_slot(&mut self, field: &str) -> Option<&mut Option<String>>;
    fn list_slot(&mut self, field: &str) -> Option<&mut Vec<String>> {
        let _ = field;
        None
    }
}

pub static BELEG_FIELDS: [FieldSpec; 17] = [
    char_field("hauptlemma", "./tei:form[@type='hauptlemma'][1]/tei:orth"),
    char_field("nebenlemma", "./tei:form[@type='nebenlemma']/tei:orth"),
    char_field("archivzeile", "./tei:ref[@type='archiv']"),
    char_field("quelle", "./tei:ref[@type='quelle']"),
    char_field("quelle_page", "./tei:ref[@type='quelle']/tei:ref[@type='seite']"),
    char_field("quelle_bearbeitet", "./tei:ref[@type='quelleBearbeitet']"),
    char_field("bibl", "./tei:ref[@type='bibl']/tei:bibl"),
    list("zitierweise", "./tei:ref[@type='zitiereweise']/tei:bibl"),
    FieldSpec { name: "pos", xpath: "./tei:gramGrp/tei:pos", kind: FieldKind::Text, max_len: Some(20) },
    char_field("ref_type_dbo", ".//tei:ref[@type='dbo']"),
    char_field("ref_type_sni", "./tei:ref[@type='sni']"),
    char_field("xr_type_verweise_o", "./tei:xr[@type='verweise' and @resp='O']"),
    char_field("xr_type_verweise_b", "./tei:xr[@type='verweise' and @resp='B']"),
    text("fragebogen_nummer", "./tei:ref[@type='fragebogenNummer']"),
    list("etym", "./tei:etym"),
    list("note_notabene", "./tei:note[@type='notabene']"),
    list("note_diverse", "./tei:note[@type='diverse']"),
];

pub static CITATION_FIELDS: [FieldSpec; 14] = [
    attribute("quote_lang", "./tei:quote/@xml:lang", 3),
    text("quote_text", "./tei:quote"),
    text("quote_gram", "./tei:quote/tei:seg[@type='gram']"),
    text("p_ref", "./tei:quote/tei:pRef"),
    text("definition", "./tei:def"),
    attribute("definition_lang", "./tei:def/@xml:lang", 3),
    attribute("corresp", "./@corresp", 250),
    attribute("definition_corresp", "./tei:def/@corresp", 250),
    text("interpration", "./tei:interp"),
    text("note_anmerkung_o", "./tei:note[@type='anmerkung' and @resp='O']"),
    text("note_anmerkung_b", "./tei:note[@type='anmerkung' and @resp='B']"),
    text("fragebogen_nummer", "./tei:ref[@type='fragebogenNummer']"),
    text("xr", "./tei:xr[@type='verweise']"),
    list("note_diverse", "./tei:note[@type='diverse']"),
];

pub static FORM_VARIANT_FIELDS: [FieldSpec; 3] = [
    text("pron", "./tei:pron"),
    attribute("pron_lang", "./tei:pron/@xml:lang", 3),
    text("pron_gram", "./tei:gramGrp/tei:gram"),
];

pub static SENSE_FIELDS: [FieldSpec; 5] = [
    text("definition", "./tei:def"),
    attribute("corresp_to", "./@corresp", 20),
    attribute("definition_lang", "./tei:def/@xml:lang", 3),
    text("note_anmerkung_o", "./tei:note[@type='anmerkung' and @resp='O']"),
    text("note_anmerkung_b", "./tei:note[@type='anmerkung' and @resp='B']"),
];

pub static ZUSATZ_LEMMA_FIELDS: [FieldSpec; 3] = [
    text("form_orth", "./tei:form/tei:orth"),
    text("pos", "./tei:gramGrp/tei:pos"),
    text("gram", "./tei:gramGrp/tei:gram"),
];

impl TeiBacked for Beleg {
    fn fields() -> &'static [FieldSpec] {
        &BELEG_FIELDS
    }

    fn text_slot(&mut self, field: &str) -> Option<&mut Option<String>> {
        Some(match field {
            "hauptlemma" => &mut self.hauptlemma,
            "nebenlemma" => &mut self.nebenlemma,
            "archivzeile" => &mut self.archivzeile,
            "quelle" => &mut self.quelle,
            "quelle_page" => &mut self.quelle_page,
            "quelle_bearbeitet" => &mut self.quelle_bearbeitet,
            "bibl" => &mut self.bibl,
            "pos" => &mut self.pos,
            "ref_type_dbo" => &mut self.ref_type_dbo,
            "ref_type_sni" => &mut self.ref_type_sni,
            "xr_type_verweise_o" => &mut self.xr_type_verweise_o,
            "xr_type_verweise_b" => &mut self.xr_type_verweise_b,
            "fragebogen_nummer" => &mut self.fragebogen_nummer,
            _ => return None,
        })
    }

    fn list_slot(&mut self, field: &str) -> Option<&mut Vec<String>> {
        Some(match field {
            "zitierweise" => &mut self.zitierweise,
            "etym" => &mut self.etym,
            "note_notabene" => &mut self.note_notabene,
            "note_diverse" => &mut self.note_diverse,
            _ => return None,
        })
    }
}

impl TeiBacked for Citation {
    fn fields() -> &'static [FieldSpec] {
        &CITATION_FIELDS
    }

    fn text_slot(&mut self, field: &str) -> Option<&mut Option<String>> {
        Some(match field {
            "quote_lang" => &mut self.quote_lang,
            "quote_text" => &mut self.quote_text,
            "quote_gram" => &mut self.quote_gram,
            "p_ref" => &mut self.p_ref,
            "definition" => &mut self.definition,
            "definition_lang" => &mut self.definition_lang,
            "corresp" => &mut self.corresp,
            "definition_corresp" => &mut self.definition_corresp,
            "interpration" => &mut self.interpration,
            "note_anmerkung_o" => &mut self.note_anmerkung_o,
            "note_anmerkung_b" => &mut self.note_anmerkung_b,
            "fragebogen_nummer" => &mut self.fragebogen_nummer,
            "xr" => &mut self.xr,
            _ => return None,
        })
    }

    fn list_slot(&mut self, field: &str) -> Option<&mut Vec<String>> {
        match field {
            "note_diverse" => Some(&mut self.note_diverse),
            _ => None,
        }
    }
}

impl TeiBacked for FormVariant {
    fn fields() -> &'static [FieldSpec] {
        &FORM_VARIANT_FIELDS
    }

    fn text_slot(&mut self, field: &str) -> Option<&mut Option<String>> {
        Some(match field {
            "pron" => &mut self.pron,
            "pron_lang" => &mut self.pron_lang,
            "pron_gram" => &mut self.pron_gram,
            _ => return None,
        })
    }
}

impl TeiBacked for Sense {
    fn fields() -> &'static [FieldSpec] {
        &SENSE_FIELDS
    }

    fn text_slot(&mut self, field: &str) -> Option<&mut Option<String>> {
        Some(match field {
            "definition" => &mut self.definition,
            "corresp_to" => &mut self.corresp_to,
            "definition_lang" => &mut self.definition_lang,
            "note_anmerkung_o" => &mut self.note_anmerkung_o,
            "note_anmerkung_b" => &mut self.note_anmerkung_b,
            _ => return None,
        })
    }
}

impl TeiBacked for ZusatzLemma {
    fn fields() -> &'static [FieldSpec] {
        &ZUSATZ_LEMMA_FIELDS
    }

    fn text_slot(&mut self, field: &str) -> Option<&mut Option<String>> {
        Some(match field {
            "form_orth" => &mut self.form_orth,
            "pos" => &mut self.pos,
            "gram" => &mut self.gram,
            _ => return None,
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(str::is_empty)
}

/// Truncates to at most `max` characters; returns whether anything was cut.
fn truncate_chars(value: &mut String, max: usize) -> bool {
    match value.char_indices().nth(max) {
        Some((byte_idx, _)) => {
            value.truncate(byte_idx);
            true
        }
        None => false,
    }
}

/// Fills the empty fields of `record` from `doc`.
///
/// Values are cut to their column length before surrounding whitespace is
/// stripped. Returns `true` when a value had to be truncated.
pub fn populate<T: TeiBacked>(record: &mut T, doc: &Element) -> Result<bool> {
    let mut truncated = false;
    for spec in T::fields() {
        match spec.kind {
            FieldKind::Text | FieldKind::Attribute => {
                let Some(slot) = record.text_slot(spec.name) else {
                    continue;
                };
                if !is_blank(slot) {
                    continue;
                }
                let Some(mut value) = doc.xpath_first_string(spec.xpath)? else {
                    continue;
                };
                if let Some(max) = spec.max_len {
                    if truncate_chars(&mut value, max) {
                        warn!("Value for '{}' exceeds {} characters, truncated.", spec.name, max);
                        truncated = true;
                    }
                }
                *slot = Some(value.trim().to_string());
            }
            FieldKind::List => {
                let Some(slot) = record.list_slot(spec.name) else {
                    continue;
                };
                if !slot.is_empty() {
                    continue;
                }
                *slot = doc
                    .xpath(spec.xpath)?
                    .iter()
                    .map(|node| node.string_value().trim().to_string())
                    .collect();
            }
        }
    }
    Ok(truncated)
}

/// Parses `orig_xml` and populates the record from it.
pub fn populate_from_xml<T: TeiBacked>(record: &mut T, orig_xml: &str) -> Result<bool> {
    let doc = tei::parse(orig_xml)?;
    populate(record, &doc)
}

/// Which child records a Beleg save should synchronise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub citations: bool,
    pub zusatz_lemma: bool,
    pub lautungen: bool,
    pub lehnwoerter: bool,
    pub senses: bool,
    pub anmerkungen_lautung: bool,
}

impl SyncOptions {
    pub fn all() -> Self {
        SyncOptions {
            citations: true,
            zusatz_lemma: true,
            lautungen: true,
            lehnwoerter: true,
            senses: true,
            anmerkungen_lautung: true,
        }
    }

    pub fn none() -> Self {
        SyncOptions::default()
    }
}

/// A child node found in a parent record's XML.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildNode {
    pub dboe_id: String,
    pub number: i64,
    pub orig_xml: String,
}

fn parse_number(element: &Element, attr: &str) -> Option<i64> {
    let raw = element.attr(attr)?;
    match raw.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(
                "Ignoring non-numeric @{}='{}' on {:?}",
                attr,
                raw,
                element.xml_id()
            );
            None
        }
    }
}

/// How a child's order number is derived when the node has no usable `@n`.
#[derive(Debug, Clone, Copy)]
pub enum Numbering {
    Position,
    One,
}

/// Collects the children selected by `xpath`, keyed by their `xml:id`.
/// Nodes without an id are skipped.
pub fn child_nodes(doc: &Element, xpath: &str, numbering: Numbering) -> Result<Vec<ChildNode>> {
    let mut out = Vec::new();
    for (position, node) in doc.xpath(xpath)?.iter().enumerate() {
        let Some(element) = node.as_element() else {
            continue;
        };
        let Some(id) = element.xml_id() else {
            warn!("Skipping <{}> without xml:id", element.name);
            continue;
        };
        let fallback = match numbering {
            Numbering::Position => position as i64 + 1,
            Numbering::One => 1,
        };
        out.push(ChildNode {
            dboe_id: id.to_string(),
            number: parse_number(element, "n").unwrap_or(fallback),
            orig_xml: element.to_xml(),
        });
    }
    Ok(out)
}

/// Sense numbers are always positional, `@n` is not consulted.
pub fn sense_nodes(doc: &Element) -> Result<Vec<ChildNode>> {
    let mut nodes = child_nodes(doc, "./tei:sense", Numbering::Position)?;
    for (i, node) in nodes.iter_mut().enumerate() {
        node.number = i as i64 + 1;
    }
    Ok(nodes)
}

pub fn citation_nodes(doc: &Element) -> Result<Vec<ChildNode>> {
    child_nodes(doc, "./tei:cit", Numbering::Position)
}

pub fn lautung_nodes(doc: &Element) -> Result<Vec<ChildNode>> {
    child_nodes(doc, "./tei:form[@type='lautung']", Numbering::One)
}

pub fn lehnwort_nodes(doc: &Element) -> Result<Vec<ChildNode>> {
    child_nodes(doc, "./tei:form[@type='lehnwort']", Numbering::One)
}

/// `tei:re` nodes of a citation; numbered by position.
pub fn zusatz_lemma_nodes(citation_doc: &Element) -> Result<Vec<ChildNode>> {
    let mut nodes = child_nodes(citation_doc, "./tei:re", Numbering::Position)?;
    for (i, node) in nodes.iter_mut().enumerate() {
        node.number = i as i64 + 1;
    }
    Ok(nodes)
}

/// Builds the pronunciation notes of a Beleg.
pub fn anmerkungen_lautung(beleg_id: &str, doc: &Element) -> Result<Vec<AnmerkungLautung>> {
    let mut out = Vec::new();
    let nodes = doc.xpath("./tei:note[@type='anmerkung' and @resp and @corresp]")?;
    for (i, node) in nodes.iter().enumerate() {
        let Some(element) = node.as_element() else {
            continue;
        };
        let number = parse_number(element, "number").unwrap_or(i as i64 + 1);
        let resp = element
            .attr("resp")
            .and_then(|r| r.parse::<Resp>().ok())
            .unwrap_or_default();
        let p_ref = element
            .xpath(".//tei:pRef")?
            .iter()
            .map(|n| n.string_value())
            .collect();
        out.push(AnmerkungLautung {
            dboe_id: format!("{}_{:0>2}", beleg_id, number),
            beleg: beleg_id.to_string(),
            number,
            resp,
            corresp_to: element.attr("corresp").map(str::to_string),
            content: Some(element.fulltext()),
            p_ref,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const ENTRY: &str = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="tu-1">
  <form type="hauptlemma"><orth> Haus </orth></form>
  <form type="nebenlemma"><orth>Häusl</orth></form>
  <form type="lautung" xml:id="tu-1.lt1" n="1"><pron xml:lang="bar">haos</pron><gramGrp><gram>Sg</gram></gramGrp></form>
  <form type="lautung" xml:id="tu-1.lt2"><pron>haisl</pron></form>
  <form type="lehnwort" xml:id="tu-1.lw1" n="1"><pron>hausa</pron></form>
  <gramGrp><pos>Subst</pos></gramGrp>
  <ref type="quelle">Fragebogen 12<ref type="seite">34</ref></ref>
  <ref type="zitiereweise"><bibl>ZW eins</bibl><bibl>ZW zwei</bibl></ref>
  <etym>ahd. hus</etym>
  <note type="diverse">LW*</note>
  <note type="anmerkung" resp="O" corresp="this:LW1">Note <pRef>p1</pRef></note>
  <cit xml:id="tu-1.c1" n="1" corresp="this:LT1">
    <quote xml:lang="bar">im Haus</quote>
    <def corresp="this:LT1">zuhause</def>
    <re xml:id="tu-1.c1.re1"><form><orth>Hausherr</orth></form><gramGrp><pos>Subst</pos></gramGrp></re>
  </cit>
  <cit xml:id="tu-1.c2"><quote>ums Haus</quote><def>um das Haus</def></cit>
  <sense xml:id="tu-1.s1" corresp="this:LT1"><def>Gebäude</def></sense>
</entry>"#;

    #[test]
    fn test_populate_beleg_fields() {
        let mut beleg = Beleg::new("tu-1", Some(ENTRY.to_string()));
        let truncated = populate_from_xml(&mut beleg, ENTRY).unwrap();
        assert!(!truncated);
        assert_eq!(beleg.hauptlemma.as_deref(), Some("Haus"));
        assert_eq!(beleg.nebenlemma.as_deref(), Some("Häusl"));
        assert_eq!(beleg.pos.as_deref(), Some("Subst"));
        assert_eq!(beleg.quelle.as_deref(), Some("Fragebogen 1234"));
        assert_eq!(beleg.quelle_page.as_deref(), Some("34"));
        assert_eq!(beleg.zitierweise, vec!["ZW eins".to_string(), "ZW zwei".to_string()]);
        assert_eq!(beleg.etym, vec!["ahd. hus".to_string()]);
        assert_eq!(beleg.note_diverse, vec!["LW*".to_string()]);
        assert!(beleg.archivzeile.is_none());
    }

    #[test]
    fn test_populate_keeps_existing_values() {
        let mut beleg = Beleg::new("tu-1", None);
        beleg.hauptlemma = Some("Edited".into());
        beleg.etym = vec!["manual".into()];
        populate_from_xml(&mut beleg, ENTRY).unwrap();
        assert_eq!(beleg.hauptlemma.as_deref(), Some("Edited"));
        assert_eq!(beleg.etym, vec!["manual".to_string()]);
        // blank values count as empty
        beleg.nebenlemma = Some(String::new());
        populate_from_xml(&mut beleg, ENTRY).unwrap();
        assert_eq!(beleg.nebenlemma.as_deref(), Some("Häusl"));
    }

    #[test]
    fn test_long_values_are_truncated_and_flagged() {
        let long = "x".repeat(300);
        let xml = format!(
            r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b"><form type="hauptlemma"><orth>{}</orth></form></entry>"#,
            long
        );
        let mut beleg = Beleg::new("b", Some(xml.clone()));
        assert!(populate_from_xml(&mut beleg, &xml).unwrap());
        assert_eq!(beleg.hauptlemma.as_ref().map(|s| s.chars().count()), Some(250));
    }

    #[test]
    fn test_truncation_counts_surrounding_whitespace() {
        let xml = format!(
            r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b"><gramGrp><pos>{}Substantiv </pos></gramGrp></entry>"#,
            " ".repeat(10)
        );
        let mut beleg = Beleg::new("b", Some(xml.clone()));
        assert!(populate_from_xml(&mut beleg, &xml).unwrap());
        assert_eq!(beleg.pos.as_deref(), Some("Substantiv"));
    }

    #[test]
    fn test_child_numbering() {
        let doc = tei::parse(ENTRY).unwrap();
        let lautungen = lautung_nodes(&doc).unwrap();
        assert_eq!(lautungen.len(), 2);
        assert_eq!((lautungen[0].number, lautungen[1].number), (1, 1));

        let cits = citation_nodes(&doc).unwrap();
        assert_eq!(cits.iter().map(|c| c.number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(cits[1].dboe_id, "tu-1.c2");

        let senses = sense_nodes(&doc).unwrap();
        assert_eq!(senses[0].dboe_id, "tu-1.s1");
        assert_eq!(senses[0].number, 1);
    }

    #[test]
    fn test_citation_and_zusatz_lemma_population() {
        let doc = tei::parse(ENTRY).unwrap();
        let node = &citation_nodes(&doc).unwrap()[0];
        let cit_doc = tei::parse(&node.orig_xml).unwrap();
        let mut citation = Citation {
            dboe_id: node.dboe_id.clone(),
            beleg: "tu-1".into(),
            number: node.number,
            orig_xml: node.orig_xml.clone(),
            ..Default::default()
        };
        populate(&mut citation, &cit_doc).unwrap();
        assert_eq!(citation.quote_text.as_deref(), Some("im Haus"));
        assert_eq!(citation.quote_lang.as_deref(), Some("bar"));
        assert_eq!(citation.corresp.as_deref(), Some("this:LT1"));
        assert_eq!(citation.definition_corresp.as_deref(), Some("this:LT1"));

        let zl = zusatz_lemma_nodes(&cit_doc).unwrap();
        assert_eq!(zl.len(), 1);
        let mut lemma = ZusatzLemma {
            dboe_id: zl[0].dboe_id.clone(),
            citation: citation.dboe_id.clone(),
            number: zl[0].number,
            orig_xml: zl[0].orig_xml.clone(),
            ..Default::default()
        };
        populate_from_xml(&mut lemma, &zl[0].orig_xml).unwrap();
        assert_eq!(lemma.form_orth.as_deref(), Some("Hausherr"));
        assert_eq!(lemma.pos.as_deref(), Some("Subst"));
        assert!(lemma.gram.is_none());
    }

    #[test]
    fn test_anmerkungen_lautung() {
        let doc = tei::parse(ENTRY).unwrap();
        let notes = anmerkungen_lautung("tu-1", &doc).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].dboe_id, "tu-1_01");
        assert_eq!(notes[0].resp, Resp::O);
        assert_eq!(notes[0].corresp_to.as_deref(), Some("this:LW1"));
        assert_eq!(notes[0].content.as_deref(), Some("Note p1"));
        assert_eq!(notes[0].p_ref, vec!["p1".to_string()]);
    }
}
