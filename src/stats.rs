//! Top-25 rankings of belege, collections and tags by related-record counts.

use crate::Dboe;
use crate::error::{DboeError, Result};
use serde::Serialize;

const TOP_N: i64 = 25;

/// Row key of a ranked record: belege are keyed by `dboe_id`, the rest by id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RankedId {
    Id(i64),
    DboeId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub id: RankedId,
    pub item_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub title: &'static str,
    pub payload: Vec<RankedItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingKind {
    BelegeByAnmerkungLautung,
    BelegeByBedeutung,
    BelegeByCollection,
    BelegeByContext,
    BelegeByFacs,
    BelegeByLautung,
    BelegeByLehnwort,
    CollectionByBeleg,
    TagsByBeleg,
}

impl RankingKind {
    pub const ALL: [RankingKind; 9] = [
        RankingKind::BelegeByAnmerkungLautung,
        RankingKind::BelegeByBedeutung,
        RankingKind::BelegeByCollection,
        RankingKind::BelegeByContext,
        RankingKind::BelegeByFacs,
        RankingKind::BelegeByLautung,
        RankingKind::BelegeByLehnwort,
        RankingKind::CollectionByBeleg,
        RankingKind::TagsByBeleg,
    ];

    /// URL segment below `/stats/`.
    pub fn path(&self) -> &'static str {
        match self {
            RankingKind::BelegeByAnmerkungLautung => "belege-by-anmerkung-lautung",
            RankingKind::BelegeByBedeutung => "belege-by-bedeutung",
            RankingKind::BelegeByCollection => "belege-by-collection",
            RankingKind::BelegeByContext => "belege-by-context",
            RankingKind::BelegeByFacs => "belege-by-facs",
            RankingKind::BelegeByLautung => "belege-by-lautung",
            RankingKind::BelegeByLehnwort => "belege-by-lehnwort",
            RankingKind::CollectionByBeleg => "collection-by-beleg",
            RankingKind::TagsByBeleg => "tags-by-beleg",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            RankingKind::BelegeByAnmerkungLautung => "Belege nach Anmerkungen zur Lautung",
            RankingKind::BelegeByBedeutung => "Belege nach Bedeutungen",
            RankingKind::BelegeByCollection => "Belege nach Collections",
            RankingKind::BelegeByContext => "Belege nach Kontexten",
            RankingKind::BelegeByFacs => "Belege nach Faksimiles",
            RankingKind::BelegeByLautung => "Belege nach Lautungen",
            RankingKind::BelegeByLehnwort => "Belege nach Lehnwörtern",
            RankingKind::CollectionByBeleg => "Collection nach Belegen",
            RankingKind::TagsByBeleg => "Tags nach Belegen",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_matches('/');
        Self::ALL.into_iter().find(|kind| kind.path() == path)
    }

    /// (table, key column, related table, foreign key column)
    fn source(&self) -> (&'static str, &'static str, &'static str, &'static str) {
        match self {
            RankingKind::BelegeByAnmerkungLautung => {
                ("belege", "dboe_id", "anmerkungen_lautung", "beleg_id")
            }
            RankingKind::BelegeByBedeutung => ("belege", "dboe_id", "senses", "beleg_id"),
            RankingKind::BelegeByCollection => {
                ("belege", "dboe_id", "beleg_collections", "beleg_id")
            }
            RankingKind::BelegeByContext => ("belege", "dboe_id", "citations", "beleg_id"),
            RankingKind::BelegeByFacs => ("belege", "dboe_id", "beleg_facs", "beleg_id"),
            RankingKind::BelegeByLautung => ("belege", "dboe_id", "lautungen", "beleg_id"),
            RankingKind::BelegeByLehnwort => ("belege", "dboe_id", "lehnwoerter", "beleg_id"),
            RankingKind::CollectionByBeleg => {
                ("collections", "id", "beleg_collections", "collection_id")
            }
            RankingKind::TagsByBeleg => ("tags", "id", "beleg_tags", "tag_id"),
        }
    }
}

impl Dboe {
    pub fn ranking(&self, kind: RankingKind) -> Result<Ranking> {
        let (table, key, related, fk) = kind.source();
        // Ties keep key order so the ranking is stable between calls.
        let sql = format!(
            "SELECT t.{key}, (SELECT COUNT(*) FROM {related} r WHERE r.{fk} = t.{key}) AS item_count
             FROM {table} t ORDER BY item_count DESC, t.{key} LIMIT ?1"
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([TOP_N], |row| {
            let id = if key == "id" {
                RankedId::Id(row.get(0)?)
            } else {
                RankedId::DboeId(row.get(0)?)
            };
            Ok(RankedItem {
                id,
                item_count: row.get(1)?,
            })
        })?;
        Ok(Ranking {
            title: kind.title(),
            payload: rows.collect::<rusqlite::Result<Vec<_>>>()?,
        })
    }

    /// Looks a ranking up by its URL segment.
    pub fn ranking_by_path(&self, path: &str) -> Result<Ranking> {
        let kind = RankingKind::from_path(path)
            .ok_or_else(|| DboeError::not_found("Ranking", path))?;
        self.ranking(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncOptions;

    const XML: &str = r#"<entry xmlns="http://www.tei-c.org/ns/1.0" xml:id="b2">
        <form type="hauptlemma"><orth>Haus</orth></form>
        <cit xml:id="b2_k1"><quote>a</quote></cit>
        <cit xml:id="b2_k2"><quote>b</quote></cit>
        <sense xml:id="b2_s1"><def>Gebäude</def></sense>
    </entry>"#;

    #[test]
    fn test_belege_by_context_orders_by_count() {
        let dboe = Dboe::open_in_memory().unwrap();
        dboe.save_beleg("b1", None, SyncOptions::none()).unwrap();
        dboe.save_beleg("b2", Some(XML.to_string()), SyncOptions::all())
            .unwrap();

        let ranking = dboe.ranking(RankingKind::BelegeByContext).unwrap();
        assert_eq!(ranking.title, "Belege nach Kontexten");
        assert_eq!(
            ranking.payload,
            vec![
                RankedItem {
                    id: RankedId::DboeId("b2".into()),
                    item_count: 2
                },
                RankedItem {
                    id: RankedId::DboeId("b1".into()),
                    item_count: 0
                },
            ]
        );
        let by_sense = dboe.ranking_by_path("belege-by-bedeutung/").unwrap();
        assert_eq!(by_sense.payload[0].item_count, 1);
    }

    #[test]
    fn test_id_keyed_rankings_serialize_numbers() {
        let dboe = Dboe::open_in_memory().unwrap();
        let tag = dboe
            .create_tag(crate::annotations::TagInput {
                name: Some("rot".into()),
                ..Default::default()
            })
            .unwrap();
        let ranking = dboe.ranking(RankingKind::TagsByBeleg).unwrap();
        let json = serde_json::to_value(&ranking).unwrap();
        assert_eq!(json["payload"][0]["id"], tag.tag.id);
        assert_eq!(json["payload"][0]["item_count"], 0);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let dboe = Dboe::open_in_memory().unwrap();
        assert!(matches!(
            dboe.ranking_by_path("belege-by-nothing"),
            Err(DboeError::NotFound { .. })
        ));
        assert_eq!(RankingKind::ALL.len(), 9);
    }
}
