//! The denormalised Beleg document served by the API and sent to the
//! search index.

use crate::models::{AnmerkungLautung, Beleg, Citation, FormVariant, Sense, ZusatzLemma};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

/// A place linked to a Beleg, with its region parents rendered as
/// `"<sigle> <name>"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceRef {
    pub sigle: String,
    pub name: String,
    pub orig_names: Vec<String>,
    pub bl: Option<String>,
    pub gr: Option<String>,
    pub kr: Option<String>,
}

/// A Beleg together with everything its document is assembled from.
#[derive(Debug, Clone, Default)]
pub struct BelegBundle {
    pub beleg: Beleg,
    pub facs: Vec<String>,
    /// Ordered by citation number.
    pub citations: Vec<(Citation, Vec<ZusatzLemma>)>,
    pub lautungen: Vec<FormVariant>,
    pub lehnwoerter: Vec<FormVariant>,
    pub senses: Vec<Sense>,
    pub anmerkungen: Vec<AnmerkungLautung>,
    pub places: Vec<PlaceRef>,
}

/// The core fields every Beleg document starts from.
pub fn base_fields(beleg: &Beleg) -> Map<String, Value> {
    let mut base = Map::new();
    base.insert("id".into(), json!(beleg.dboe_id));
    base.insert("hl".into(), json!(beleg.hauptlemma));
    base.insert("nl".into(), json!(beleg.nebenlemma));
    base.insert("qu".into(), json!(beleg.quelle));
    base.insert("bibl".into(), json!(beleg.bibl));
    base.insert("pos".into(), json!(beleg.pos));
    base.insert("archivzeile".into(), json!(beleg.archivzeile));
    base
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn or_empty(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn zusatz_lemma_line(lemma: &ZusatzLemma) -> String {
    format!(
        "{}||{}||{}",
        or_empty(&lemma.form_orth),
        or_empty(&lemma.pos),
        or_empty(&lemma.gram)
    )
}

/// Builds the document for one Beleg, layered over `base` (or the core
/// fields when `base` is `None`).
pub fn build_representation(
    bundle: &BelegBundle,
    base: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let beleg = &bundle.beleg;
    let mut ret = base.unwrap_or_else(|| base_fields(beleg));

    ret.insert("tustep".into(), json!(beleg.xeno_data));
    ret.insert("facs".into(), json!(bundle.facs));

    let verweise: Vec<&str> = [
        &beleg.ref_type_dbo,
        &beleg.ref_type_sni,
        &beleg.xr_type_verweise_o,
        &beleg.xr_type_verweise_b,
    ]
    .into_iter()
    .filter_map(non_empty)
    .collect();

    // A single citation without a number voids the citation part
    let cit_numbers: Option<Vec<&str>> = bundle
        .citations
        .iter()
        .map(|(c, _)| c.fragebogen_nummer.as_deref())
        .collect();
    let cit_fragebogen_nr = cit_numbers.map(|n| n.join(" ")).unwrap_or_default();
    let fragebogen_nr = non_empty(&beleg.fragebogen_nummer)
        .map(|n| format!("{} ", n))
        .unwrap_or_default();
    ret.insert("nr".into(), json!(format!("{}{}", fragebogen_nr, cit_fragebogen_nr)));
    ret.insert("verweis".into(), json!(verweise));
    ret.insert("page".into(), json!(beleg.quelle_page));
    ret.insert("etym".into(), json!(beleg.etym));
    ret.insert("a".into(), json!(beleg.archivzeile));

    let mut siglen = BTreeSet::new();
    let mut bundeslaender = BTreeSet::new();
    let mut gregion = BTreeSet::new();
    let mut kregion = BTreeSet::new();
    let mut orte = BTreeSet::new();
    let mut orig_orte = Vec::new();
    for place in &bundle.places {
        siglen.insert(place.sigle.as_str());
        orte.insert(place.name.as_str());
        orig_orte.extend(place.orig_names.iter().map(String::as_str));
        bundeslaender.extend(place.bl.as_deref());
        gregion.extend(place.gr.as_deref());
        kregion.extend(place.kr.as_deref());
    }
    ret.insert("siglen".into(), json!(siglen));
    ret.insert("bundeslaender".into(), json!(bundeslaender));
    ret.insert("gregion".into(), json!(gregion));
    ret.insert("kregion".into(), json!(kregion));
    ret.insert("orte".into(), json!(orte));
    ret.insert("orig_orte".into(), json!(orig_orte));

    ret.insert("dv_lw_star".into(), json!(beleg.note_diverse));

    for lautung in &bundle.lautungen {
        ret.insert(format!("gram_lt{}", lautung.number), json!([lautung.pron_gram]));
        ret.insert(format!("lt{}_teuthonista", lautung.number), json!([lautung.pron]));
    }
    for lehnwort in &bundle.lehnwoerter {
        ret.insert(format!("lw{}", lehnwort.number), json!(lehnwort.pron));
    }

    let anm_lt: Vec<&Option<String>> = bundle.anmerkungen.iter().map(|a| &a.content).collect();
    ret.insert("anm_lt_star".into(), json!(anm_lt));
    if let Some((first, _)) = bundle.citations.iter().find(|(c, _)| c.number == 1) {
        ret.insert("kl_kt1".into(), json!(first.interpration));
    }

    let mut anm_kt = Vec::new();
    let mut bd_kt = Vec::new();
    let mut wbd_kt = Vec::new();
    let mut vrw_kt = Vec::new();
    let mut dv_kt = Vec::new();
    for (citation, zusatz_lemmata) in &bundle.citations {
        let n = citation.number;
        if let Some(corresp) = citation.corresp.as_deref().filter(|c| c.contains("this:LT")) {
            let cur_lt = corresp.rsplit(':').next().unwrap_or(corresp);
            ret.insert(format!("kt_{}", cur_lt.to_lowercase()), json!(citation.quote_text));
        }
        if let Some(definition) = non_empty(&citation.definition) {
            if citation.definition_corresp.is_none() {
                bd_kt.push(format!("{} ›KT {}", definition, n));
            } else {
                wbd_kt.push(format!("{} ›WBD/KT{}/KT{}", definition, n, n));
            }
        }
        ret.insert(format!("kt{}", n), json!([citation.quote_text]));
        for lemma in zusatz_lemmata {
            ret.insert(
                format!("zl{}_kt{}", lemma.number, n),
                json!([zusatz_lemma_line(lemma)]),
            );
        }
        for note in &citation.note_diverse {
            dv_kt.push(format!("{} ›KT {}", note, n));
        }
        if let Some(xr) = non_empty(&citation.xr) {
            vrw_kt.push(format!("O: {} ›KT{}", xr, n));
        }
        if let Some(note) = non_empty(&citation.note_anmerkung_o) {
            anm_kt.push(format!("O: {} ›KT{}", note, n));
        }
        if let Some(note) = non_empty(&citation.note_anmerkung_b) {
            anm_kt.push(format!("B: {} ›KT{}", note, n));
        }
    }
    ret.insert("anm_kt_star".into(), json!(anm_kt));
    ret.insert("bd_kt_star".into(), json!(bd_kt));
    ret.insert("wbd_kt_star".into(), json!(wbd_kt));
    ret.insert("vrw_kt_star".into(), json!(vrw_kt));
    ret.insert("dv_kt_star".into(), json!(dv_kt));

    let bd_lw: Vec<&Option<String>> = bundle
        .senses
        .iter()
        .filter(|s| s.corresp_to.as_deref().is_some_and(|c| c.contains("LW")))
        .map(|s| &s.definition)
        .collect();
    ret.insert("bd_lw_star".into(), json!(bd_lw));

    for i in ["1", "2"] {
        let corresp = format!("this:LT{}", i);
        let linked: Vec<&(Citation, Vec<ZusatzLemma>)> = bundle
            .citations
            .iter()
            .filter(|(c, _)| c.corresp.as_deref() == Some(corresp.as_str()))
            .collect();
        let definitions: Vec<&str> = linked
            .iter()
            .filter(|(c, _)| c.definition_corresp.is_none())
            .filter_map(|(c, _)| c.definition.as_deref())
            .collect();
        let quotes: Vec<&str> = linked
            .iter()
            .filter_map(|(c, _)| c.quote_text.as_deref())
            .collect();
        ret.insert(format!("bd_kt_lt{}", i), json!(definitions));
        ret.insert(format!("kt_lt{}", i), json!(quotes));
        ret.insert(format!("zl1_kt_lt{}", i), json!(""));
        ret.insert(format!("zl2_kt_lt{}", i), json!(""));
        let lemmata = linked.iter().flat_map(|(_, zl)| zl.iter());
        for (n, lemma) in lemmata.enumerate() {
            ret.insert(format!("zl{}_kt_lt{}", n + 1, i), json!(zusatz_lemma_line(lemma)));
        }
    }

    let anm_lw: Vec<String> = bundle
        .anmerkungen
        .iter()
        .filter(|a| {
            a.corresp_to
                .as_deref()
                .is_some_and(|c| c.to_lowercase().contains("this:lw1"))
        })
        .map(|a| {
            format!(
                "{}: {} ›{}",
                a.resp,
                or_empty(&a.content),
                or_empty(&a.corresp_to).replace("this:", "")
            )
        })
        .collect();
    ret.insert("anm_lw_star".into(), json!(anm_lw));

    let bd_lt: Vec<String> = bundle
        .senses
        .iter()
        .filter(|s| s.corresp_to.as_deref().is_some_and(|c| c.contains("LT")))
        .map(|s| match non_empty(&s.note_anmerkung_o) {
            Some(note) => format!("{}ANMO: {} ›LT{}", or_empty(&s.definition), note, s.number),
            None => format!("{} ›LT{}", or_empty(&s.definition), s.number),
        })
        .collect();
    ret.insert("bd_lt_star".into(), json!(bd_lt));

    for (i, zw) in beleg.zitierweise.iter().enumerate() {
        ret.insert(format!("zw{}", i + 1), json!([zw]));
    }
    ret
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.iter().all(is_blank),
        _ => false,
    }
}

/// Drops keys whose value is null, an empty string, or an array holding
/// nothing but such values.
pub fn sanitize(mut representation: Map<String, Value>) -> Map<String, Value> {
    representation.retain(|_, v| !is_blank(v));
    representation
}

/// The document sent to the search index.
pub fn sanitize_representation(bundle: &BelegBundle) -> Map<String, Value> {
    sanitize(build_representation(bundle, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Resp;

    fn citation(number: i64) -> Citation {
        Citation {
            dboe_id: format!("b.c{}", number),
            beleg: "b".into(),
            number,
            ..Default::default()
        }
    }

    fn bundle() -> BelegBundle {
        let mut beleg = Beleg::new("b", None);
        beleg.hauptlemma = Some("Haus".into());
        beleg.fragebogen_nummer = Some("12".into());
        beleg.ref_type_dbo = Some("→Hütte".into());
        beleg.zitierweise = vec!["ZW".into()];
        beleg.note_diverse = vec!["LW*".into()];

        let mut c1 = citation(1);
        c1.corresp = Some("this:LT1".into());
        c1.quote_text = Some("im Haus".into());
        c1.definition = Some("zuhause".into());
        c1.interpration = Some("kl".into());
        c1.fragebogen_nummer = Some("3".into());
        c1.note_anmerkung_o = Some("alt".into());
        let zl = ZusatzLemma {
            dboe_id: "b.c1.re1".into(),
            citation: "b.c1".into(),
            number: 1,
            form_orth: Some("Hausherr".into()),
            pos: Some("Subst".into()),
            ..Default::default()
        };
        let mut c2 = citation(2);
        c2.quote_text = Some("ums Haus".into());
        c2.definition = Some("um".into());
        c2.definition_corresp = Some("this:LW1".into());
        c2.fragebogen_nummer = Some("4".into());
        c2.xr = Some("vgl.".into());

        BelegBundle {
            beleg,
            facs: vec!["tu%2F1.jpg".into()],
            citations: vec![(c1, vec![zl]), (c2, Vec::new())],
            lautungen: vec![FormVariant {
                dboe_id: "b.lt1".into(),
                beleg: "b".into(),
                number: 1,
                pron: Some("haos".into()),
                pron_gram: Some("Sg".into()),
                ..Default::default()
            }],
            lehnwoerter: vec![FormVariant {
                dboe_id: "b.lw1".into(),
                beleg: "b".into(),
                number: 1,
                pron: Some("hausa".into()),
                ..Default::default()
            }],
            senses: vec![Sense {
                dboe_id: "b.s1".into(),
                beleg: "b".into(),
                number: 1,
                definition: Some("Gebäude".into()),
                corresp_to: Some("this:LT1".into()),
                ..Default::default()
            }],
            anmerkungen: vec![AnmerkungLautung {
                dboe_id: "b_01".into(),
                beleg: "b".into(),
                number: 1,
                resp: Resp::B,
                corresp_to: Some("this:LW1".into()),
                content: Some("Lehnwort".into()),
                p_ref: Vec::new(),
            }],
            places: vec![PlaceRef {
                sigle: "1A01".into(),
                name: "Wien".into(),
                orig_names: vec!["Wean".into()],
                bl: Some("1 Wien".into()),
                gr: None,
                kr: None,
            }],
        }
    }

    #[test]
    fn test_build_representation_formats() {
        let doc = build_representation(&bundle(), None);
        assert_eq!(doc["id"], "b");
        assert_eq!(doc["hl"], "Haus");
        assert_eq!(doc["nr"], "12 3 4");
        assert_eq!(doc["verweis"], json!(["→Hütte"]));
        assert_eq!(doc["siglen"], json!(["1A01"]));
        assert_eq!(doc["bundeslaender"], json!(["1 Wien"]));
        assert_eq!(doc["gregion"], json!([]));
        assert_eq!(doc["orig_orte"], json!(["Wean"]));
        assert_eq!(doc["gram_lt1"], json!(["Sg"]));
        assert_eq!(doc["lt1_teuthonista"], json!(["haos"]));
        assert_eq!(doc["lw1"], "hausa");
        assert_eq!(doc["kl_kt1"], "kl");
        assert_eq!(doc["bd_kt_star"], json!(["zuhause ›KT 1"]));
        assert_eq!(doc["wbd_kt_star"], json!(["um ›WBD/KT2/KT2"]));
        assert_eq!(doc["vrw_kt_star"], json!(["O: vgl. ›KT2"]));
        assert_eq!(doc["anm_kt_star"], json!(["O: alt ›KT1"]));
        assert_eq!(doc["kt1"], json!(["im Haus"]));
        assert_eq!(doc["zl1_kt1"], json!(["Hausherr||Subst||"]));
        assert_eq!(doc["kt_lt1"], json!(["im Haus"]));
        assert_eq!(doc["bd_kt_lt1"], json!(["zuhause"]));
        assert_eq!(doc["zl1_kt_lt1"], "Hausherr||Subst||");
        assert_eq!(doc["zl2_kt_lt1"], "");
        assert_eq!(doc["anm_lw_star"], json!(["B: Lehnwort ›LW1"]));
        assert_eq!(doc["bd_lt_star"], json!(["Gebäude ›LT1"]));
        assert_eq!(doc["dv_lw_star"], json!(["LW*"]));
        assert_eq!(doc["zw1"], json!(["ZW"]));
        assert_eq!(doc["facs"], json!(["tu%2F1.jpg"]));
    }

    #[test]
    fn test_missing_citation_number_voids_citation_part() {
        let mut b = bundle();
        b.citations[1].0.fragebogen_nummer = None;
        let doc = build_representation(&b, None);
        assert_eq!(doc["nr"], "12 ");
    }

    #[test]
    fn test_sanitize_drops_blank_values() {
        let doc = sanitize_representation(&bundle());
        assert!(!doc.contains_key("nl"));
        assert!(!doc.contains_key("gregion"));
        assert!(!doc.contains_key("zl2_kt_lt1"));
        assert!(!doc.contains_key("tustep"));
        assert!(doc.contains_key("hl"));
        assert!(doc.contains_key("zl1_kt_lt1"));
    }

    #[test]
    fn test_base_is_layered_under_document() {
        let mut base = Map::new();
        base.insert("url".into(), json!("/api/belege-elastic-search/b/"));
        base.insert("id".into(), json!("b"));
        let doc = build_representation(&bundle(), Some(base));
        assert_eq!(doc["url"], "/api/belege-elastic-search/b/");
        assert!(!doc.contains_key("hl"));
        assert_eq!(doc["kt2"], json!(["ums Haus"]));
    }
}
