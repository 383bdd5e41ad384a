// Declare modules
pub mod annotations;
pub mod api;
pub mod belege;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod filters;
pub mod models;
pub mod parse;
pub mod progress;
pub mod representation;
pub mod search;
pub mod siglen;
pub mod stats;
pub mod tei;

// Re-export key types for easier use
pub use config::Settings;
pub use error::{DboeError, Result};
pub use extract::SyncOptions;
pub use models::{
    AnmerkungLautung,
    Annotation,
    AutorArtikel,
    Beleg,
    BelegFacs,
    BelegSigle,
    Category,
    Citation,
    Collection,
    EditOfArticle,
    EsDocument,
    Facsimile,
    FormVariant,
    KontextAnnotation,
    Lautung,
    LehnWort,
    Lemma,
    Resp,
    Sense,
    Sigle,
    SigleKind,
    Status,
    Step,
    Tag,
    User,
    ZusatzLemma,
};
pub use search::SearchClient;

use directories_next::ProjectDirs;
use log::{debug, error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DB_FILE_NAME: &str = "dboe.db";

/// Options for opening the DBÖ database.
#[derive(Debug, Default, Clone)]
pub struct OpenOptions {
    /// Optional path to a specific database file to use or create.
    /// If None, the default location based on ProjectDirs will be used.
    pub db_path: Option<PathBuf>,
    /// Delete all rows after opening, keeping the schema.
    pub force_reload: bool,
}

/// Handle on the DBÖ store. Every record type gets its operations from an
/// `impl Dboe` block in its own module.
#[derive(Clone)] // Clone is cheap due to Arc<Mutex<...>>
pub struct Dboe {
    conn: Arc<Mutex<Connection>>,
    db_file_path: Option<Arc<PathBuf>>,
}

impl Dboe {
    /// Opens the database at the default location.
    pub fn open() -> Result<Self> {
        Self::open_with_options(OpenOptions::default())
    }

    pub fn open_with_options(options: OpenOptions) -> Result<Self> {
        let db_path = match options.db_path {
            Some(path) => {
                info!("Using provided database path: {:?}", path);
                path
            }
            None => Self::get_default_db_path()?,
        };
        info!("Using database path: {:?}", db_path);

        let mut conn = db::open_db_connection(&db_path)?;
        db::initialize_database(&mut conn)?;

        if options.force_reload {
            info!("Force reload requested. Clearing existing database data...");
            let tx = conn.transaction()?;
            db::clear_database_data(&tx)?;
            tx.commit()?;
        }

        Ok(Dboe {
            conn: Arc::new(Mutex::new(conn)),
            db_file_path: Some(Arc::new(db_path)),
        })
    }

    /// A fresh, schema-initialised database living only in memory.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        db::configure_connection(&conn)?;
        db::initialize_database(&mut conn)?;
        Ok(Dboe {
            conn: Arc::new(Mutex::new(conn)),
            db_file_path: None,
        })
    }

    pub fn db_file_path(&self) -> Option<&Path> {
        self.db_file_path.as_deref().map(PathBuf::as_path)
    }

    /// Gets the default path for the SQLite database file.
    pub fn get_default_db_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("at", "ACDH", "dboe-backend").ok_or(DboeError::DataDirNotFound)?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join(DB_FILE_NAME))
    }

    /// Deletes the database file together with its WAL and SHM companions.
    ///
    /// If `db_path_override` is `None`, the default database path is used.
    pub fn clear_database(db_path_override: Option<PathBuf>) -> Result<()> {
        let path_to_clear = match db_path_override {
            Some(path) => {
                info!("Attempting to clear specified database file: {:?}", path);
                path
            }
            None => {
                let default_path = Self::get_default_db_path()?;
                info!("Attempting to clear default database file: {:?}", default_path);
                default_path
            }
        };

        if !path_to_clear.exists() {
            info!(
                "Database file not found, nothing to clear: {:?}",
                path_to_clear
            );
            return Ok(());
        }

        match std::fs::remove_file(&path_to_clear) {
            Ok(_) => {
                info!("Successfully deleted database file: {:?}", path_to_clear);
                for suffix in ["-wal", "-shm"] {
                    let mut companion = path_to_clear.clone().into_os_string();
                    companion.push(suffix);
                    let companion = PathBuf::from(companion);
                    match std::fs::remove_file(&companion) {
                        Ok(_) => debug!("Deleted {:?}", companion),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            error!("Failed to delete {:?}: {}", companion, e);
                            return Err(DboeError::Io(e));
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to delete database file {:?}: {}", path_to_clear, e);
                Err(DboeError::Io(e))
            }
        }
    }

    /// Deletes every row, keeping the schema.
    pub fn clear_data(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        db::clear_database_data(&tx)?;
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DboeError::Internal("Mutex poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dboe.db");
        {
            let dboe = Dboe::open_with_options(OpenOptions {
                db_path: Some(path.clone()),
                force_reload: false,
            })
            .unwrap();
            assert_eq!(dboe.db_file_path(), Some(path.as_path()));
        }
        assert!(path.exists());
        Dboe::clear_database(Some(path.clone())).unwrap();
        assert!(!path.exists());
        // Clearing a missing file is not an error
        Dboe::clear_database(Some(path)).unwrap();
    }

    #[test]
    fn test_clear_reports_undeletable_companion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dboe.db");
        std::fs::write(&path, b"").unwrap();
        // a directory where the WAL file would be cannot be removed as a file
        std::fs::create_dir(dir.path().join("dboe.db-wal")).unwrap();
        assert!(matches!(
            Dboe::clear_database(Some(path.clone())),
            Err(DboeError::Io(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_force_reload_empties_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dboe.db");
        let options = OpenOptions {
            db_path: Some(path.clone()),
            force_reload: false,
        };
        let dboe = Dboe::open_with_options(options.clone()).unwrap();
        dboe.create_category(&Category {
            name: "lemma".into(),
            ..Default::default()
        })
        .unwrap();
        drop(dboe);

        let reopened = Dboe::open_with_options(options.clone()).unwrap();
        assert_eq!(reopened.list_categories(&[]).unwrap().len(), 1);
        drop(reopened);

        let reloaded = Dboe::open_with_options(OpenOptions {
            force_reload: true,
            ..options
        })
        .unwrap();
        assert!(reloaded.list_categories(&[]).unwrap().is_empty());
    }
}
