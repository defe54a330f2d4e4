// src/db/store.rs

//! Scoped package metadata store
//!
//! One `packages` table holds the cached metadata for every scope: the host
//! image rows carry an empty `container` column, container rows carry the
//! owning container name. The table is bulk-replaced from a full metadata
//! scan and reconciled field-by-field against the authoritative installed
//! set; it is never the source of truth for what is actually installed.

use crate::db::query::{
    join_tokens, split_tokens, Filter, PackageField, QuerySpec,
};
use crate::error::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Insert batch size for bulk replace operations
const BATCH_SIZE: usize = 1000;

/// The namespace a package row belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The host system image
    Host,
    /// One named container
    Container(String),
}

impl Scope {
    /// Value stored in the `container` column for this scope
    pub fn key(&self) -> &str {
        match self {
            Scope::Host => "",
            Scope::Container(name) => name,
        }
    }
}

/// One row of cached package metadata
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    pub section: String,
    pub maintainer: String,
    pub version: String,
    /// Empty when the package is not installed
    pub version_installed: String,
    pub depends: Vec<String>,
    pub provides: Vec<String>,
    pub size: i64,
    pub installed_size: i64,
    pub filename: String,
    pub description: String,
    pub changelog: Option<String>,
    pub installed: bool,
    pub exporting: bool,
    /// Owning container; empty for host rows
    pub container: String,
    /// Originating package manager; empty for host rows
    pub manager: String,
}

impl Package {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let depends: String = row.get(7)?;
        let provides: String = row.get(8)?;
        let installed: i64 = row.get(13)?;
        let exporting: i64 = row.get(14)?;
        Ok(Self {
            container: row.get(0)?,
            name: row.get(1)?,
            section: row.get(2)?,
            installed_size: row.get(3)?,
            maintainer: row.get(4)?,
            version: row.get(5)?,
            version_installed: row.get(6)?,
            depends: split_tokens(&depends),
            provides: split_tokens(&provides),
            size: row.get(9)?,
            filename: row.get(10)?,
            description: row.get(11)?,
            changelog: row.get(12)?,
            installed: installed != 0,
            exporting: exporting != 0,
            manager: row.get(15)?,
        })
    }
}

const SELECT_COLUMNS: &str = "container, name, section, installed_size, maintainer, version, \
     version_installed, depends, provides, size, filename, description, \
     changelog, installed, exporting, manager";

/// Create the packages table and its scope/name index. Idempotent.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS packages (
            container TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            installed_size INTEGER NOT NULL DEFAULT 0,
            maintainer TEXT NOT NULL DEFAULT '',
            version TEXT NOT NULL DEFAULT '',
            version_installed TEXT NOT NULL DEFAULT '',
            depends TEXT NOT NULL DEFAULT '',
            provides TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL DEFAULT 0,
            filename TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            changelog TEXT,
            installed INTEGER NOT NULL DEFAULT 0,
            exporting INTEGER NOT NULL DEFAULT 0,
            manager TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS idx_packages_scope_name ON packages(container, name);
        ",
    )?;
    Ok(())
}

/// The scoped package metadata store.
///
/// Replace and reconcile operations are serialized by a store-local lock.
/// All access shares one connection behind a mutex, so a reader arriving
/// during a replace waits for the transaction to commit and then observes
/// the fully replaced state; other processes on the same database file
/// read the pre-replace snapshot through WAL.
pub struct PackageStore {
    conn: Mutex<Connection>,
    sync_lock: Mutex<()>,
    cancel: Arc<AtomicBool>,
}

impl PackageStore {
    /// Wrap an open connection. The schema is created if absent.
    pub fn new(conn: Connection) -> Result<Self> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            sync_lock: Mutex::new(()),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle for requesting cancellation of an in-flight replace from
    /// another thread (e.g. a signal handler). Checked between insert
    /// batches; the current batch always completes so the transaction is
    /// never left mid-statement.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // Recover the guard on poison; SQLite state is consistent because
        // every multi-statement operation runs in a transaction.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consumes the cancellation request: a cancelled operation returns
    /// an error and the flag resets so the next operation starts clean.
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.swap(false, Ordering::Relaxed) {
            return Err(Error::ExecutionFailed(
                "metadata operation cancelled".to_string(),
            ));
        }
        Ok(())
    }

    /// Idempotent full refresh of one scope from a metadata scan.
    ///
    /// Deletes the scope's rows and bulk-inserts the new set inside a
    /// single transaction; any failure rolls the whole replace back,
    /// leaving the prior snapshot untouched.
    pub fn replace_all(&self, scope: &Scope, packages: &[Package]) -> Result<()> {
        let _sync = self.sync_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut conn = self.conn();

        debug!(
            "Replacing {} package rows for scope '{}'",
            packages.len(),
            scope.key()
        );

        let tx = conn.transaction()?;

        tx.execute("DELETE FROM packages WHERE container = ?1", [scope.key()])?;

        for batch in packages.chunks(BATCH_SIZE) {
            self.check_cancelled()?;

            let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"; batch.len()]
                .join(", ");
            let sql = format!(
                "INSERT INTO packages ({}) VALUES {}",
                SELECT_COLUMNS, placeholders
            );

            let mut args: Vec<Value> = Vec::with_capacity(batch.len() * 16);
            for pkg in batch {
                args.push(Value::Text(scope.key().to_string()));
                args.push(Value::Text(pkg.name.clone()));
                args.push(Value::Text(pkg.section.clone()));
                args.push(Value::Integer(pkg.installed_size));
                args.push(Value::Text(pkg.maintainer.clone()));
                args.push(Value::Text(pkg.version.clone()));
                args.push(Value::Text(pkg.version_installed.clone()));
                args.push(Value::Text(join_tokens(&pkg.depends)?));
                args.push(Value::Text(join_tokens(&pkg.provides)?));
                args.push(Value::Integer(pkg.size));
                args.push(Value::Text(pkg.filename.clone()));
                args.push(Value::Text(pkg.description.clone()));
                args.push(match &pkg.changelog {
                    Some(text) => Value::Text(text.clone()),
                    None => Value::Null,
                });
                args.push(Value::Integer(i64::from(pkg.installed)));
                args.push(Value::Integer(i64::from(pkg.exporting)));
                args.push(Value::Text(pkg.manager.clone()));
            }

            tx.execute(&sql, params_from_iter(args))?;
        }

        tx.commit()?;
        info!(
            "Replaced scope '{}' with {} packages",
            scope.key(),
            packages.len()
        );
        Ok(())
    }

    /// Reconcile installed flags against the authoritative installed set.
    ///
    /// Sets `installed`/`version_installed` for every row in the scope from
    /// the given name -> version map. Never adds or removes rows. Uses a
    /// temporary staging table joined against the main table instead of one
    /// UPDATE per package.
    pub fn reconcile_installed(
        &self,
        scope: &Scope,
        installed: &HashMap<String, String>,
    ) -> Result<()> {
        let _sync = self.sync_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut conn = self.conn();

        let tx = conn.transaction()?;

        tx.execute_batch(
            "CREATE TEMPORARY TABLE tmp_installed (
                name TEXT PRIMARY KEY,
                version TEXT
            )",
        )?;

        let entries: Vec<(&String, &String)> = installed.iter().collect();
        for batch in entries.chunks(BATCH_SIZE) {
            self.check_cancelled()?;

            let placeholders = vec!["(?, ?)"; batch.len()].join(", ");
            let sql = format!("INSERT INTO tmp_installed (name, version) VALUES {}", placeholders);
            let mut args: Vec<Value> = Vec::with_capacity(batch.len() * 2);
            for (name, version) in batch {
                args.push(Value::Text((*name).clone()));
                args.push(Value::Text((*version).clone()));
            }
            tx.execute(&sql, params_from_iter(args))?;
        }

        let updated = tx.execute(
            "UPDATE packages
             SET installed = CASE
                     WHEN EXISTS (SELECT 1 FROM tmp_installed t WHERE t.name = packages.name)
                     THEN 1 ELSE 0
                 END,
                 version_installed = COALESCE(
                     (SELECT t.version FROM tmp_installed t WHERE t.name = packages.name),
                     ''
                 )
             WHERE container = ?1",
            [scope.key()],
        )?;

        tx.execute_batch("DROP TABLE tmp_installed")?;
        tx.commit()?;

        debug!(
            "Reconciled installed state for {} rows in scope '{}'",
            updated,
            scope.key()
        );
        Ok(())
    }

    /// Exact lookup by name within a scope
    pub fn get_by_name(&self, scope: &Scope, name: &str) -> Result<Package> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM packages WHERE container = ?1 AND name = ?2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row([scope.key(), name], Package::from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Error::PackageNotFound(name.to_string()),
                other => Error::Database(other),
            })
    }

    /// Substring search on name, optionally restricted to installed rows
    pub fn search(&self, scope: &Scope, name_part: &str, installed_only: bool) -> Result<Vec<Package>> {
        let conn = self.conn();
        let mut sql = format!(
            "SELECT {} FROM packages WHERE container = ?1 AND name LIKE ?2",
            SELECT_COLUMNS
        );
        if installed_only {
            sql.push_str(" AND installed = 1");
        }
        let pattern = format!("%{}%", name_part);

        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map([scope.key(), pattern.as_str()], Package::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(packages)
    }

    /// True iff at least one row exists for the scope.
    ///
    /// Used as a cheap "has this scope ever been scanned" gate.
    pub fn exists(&self, scope: &Scope) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages WHERE container = ?1",
            [scope.key()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Filtered, sorted, paginated query over a scope
    pub fn query(&self, scope: &Scope, spec: &QuerySpec) -> Result<Vec<Package>> {
        let conn = self.conn();
        let (suffix, args) = spec.build(
            vec!["container = ?".to_string()],
            vec![Value::Text(scope.key().to_string())],
        );
        let sql = format!("SELECT {} FROM packages{}", SELECT_COLUMNS, suffix);

        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params_from_iter(args), Package::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(packages)
    }

    /// Row count for a scope under the same filter semantics as `query`
    pub fn count(&self, scope: &Scope, filters: &[Filter]) -> Result<i64> {
        let conn = self.conn();
        let spec = QuerySpec {
            filters: filters.to_vec(),
            ..QuerySpec::default()
        };
        let (suffix, args) = spec.build_where(
            vec!["container = ?".to_string()],
            vec![Value::Text(scope.key().to_string())],
        );
        let sql = format!("SELECT COUNT(*) FROM packages{}", suffix);

        let count = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(count)
    }

    /// Single-field mutation after a successful install/remove/export,
    /// restricted to the boolean state fields. Avoids a full rescan.
    pub fn update_field(
        &self,
        scope: &Scope,
        name: &str,
        field: PackageField,
        value: bool,
    ) -> Result<()> {
        if !matches!(field, PackageField::Installed | PackageField::Exporting) {
            return Err(Error::InvalidField {
                field: field.as_str().to_string(),
                allowed: "installed, exporting".to_string(),
            });
        }

        let conn = self.conn();
        let sql = format!(
            "UPDATE packages SET {} = ?1 WHERE container = ?2 AND name = ?3",
            field.column()
        );
        let updated = conn.execute(
            &sql,
            rusqlite::params![i64::from(value), scope.key(), name],
        )?;
        if updated == 0 {
            warn!(
                "update_field touched no rows: scope '{}', package '{}'",
                scope.key(),
                name
            );
        }
        Ok(())
    }

    /// Bulk teardown of one container's rows
    pub fn delete_scope(&self, scope: &Scope) -> Result<()> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM packages WHERE container = ?1", [scope.key()])?;
        info!("Deleted {} rows for scope '{}'", deleted, scope.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::{FilterValue, SortOrder};

    fn test_store() -> PackageStore {
        let conn = Connection::open_in_memory().unwrap();
        PackageStore::new(conn).unwrap()
    }

    fn pkg(name: &str, version: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            section: "utils".to_string(),
            ..Package::default()
        }
    }

    #[test]
    fn test_replace_then_replace_leaves_no_residue() {
        let store = test_store();
        let scope = Scope::Host;

        let set_a = vec![pkg("alpha", "1"), pkg("beta", "2"), pkg("gamma", "3")];
        store.replace_all(&scope, &set_a).unwrap();
        assert_eq!(store.count(&scope, &[]).unwrap(), 3);

        let set_b = vec![pkg("delta", "4")];
        store.replace_all(&scope, &set_b).unwrap();
        assert_eq!(store.count(&scope, &[]).unwrap(), 1);
        assert!(store.get_by_name(&scope, "alpha").is_err());
        assert_eq!(store.get_by_name(&scope, "delta").unwrap().version, "4");

        // Replacing with the empty set empties the scope
        store.replace_all(&scope, &[]).unwrap();
        assert_eq!(store.count(&scope, &[]).unwrap(), 0);
        assert!(!store.exists(&scope).unwrap());
    }

    #[test]
    fn test_replace_is_scoped() {
        let store = test_store();
        let host = Scope::Host;
        let container = Scope::Container("dev".to_string());

        store.replace_all(&host, &[pkg("host-pkg", "1")]).unwrap();
        store
            .replace_all(&container, &[pkg("box-pkg", "1"), pkg("box-extra", "2")])
            .unwrap();

        // Replacing the container scope must not touch host rows
        store.replace_all(&container, &[pkg("box-pkg", "3")]).unwrap();
        assert_eq!(store.count(&host, &[]).unwrap(), 1);
        assert_eq!(store.count(&container, &[]).unwrap(), 1);
        assert_eq!(store.get_by_name(&container, "box-pkg").unwrap().version, "3");
    }

    #[test]
    fn test_reconcile_updates_flags_without_changing_row_count() {
        let store = test_store();
        let scope = Scope::Host;
        store
            .replace_all(&scope, &[pkg("a", "v1"), pkg("b", "v2")])
            .unwrap();

        let mut installed = HashMap::new();
        installed.insert("a".to_string(), "v1".to_string());
        store.reconcile_installed(&scope, &installed).unwrap();

        assert_eq!(store.count(&scope, &[]).unwrap(), 2);

        let a = store.get_by_name(&scope, "a").unwrap();
        assert!(a.installed);
        assert_eq!(a.version_installed, "v1");

        let b = store.get_by_name(&scope, "b").unwrap();
        assert!(!b.installed);
        assert_eq!(b.version_installed, "");

        // A second reconcile with an empty set clears the flags again
        store.reconcile_installed(&scope, &HashMap::new()).unwrap();
        let a = store.get_by_name(&scope, "a").unwrap();
        assert!(!a.installed);
        assert_eq!(a.version_installed, "");
        assert_eq!(store.count(&scope, &[]).unwrap(), 2);
    }

    #[test]
    fn test_reconcile_never_adds_rows() {
        let store = test_store();
        let scope = Scope::Host;
        store.replace_all(&scope, &[pkg("known", "1")]).unwrap();

        let mut installed = HashMap::new();
        installed.insert("known".to_string(), "1".to_string());
        installed.insert("stranger".to_string(), "9".to_string());
        store.reconcile_installed(&scope, &installed).unwrap();

        assert_eq!(store.count(&scope, &[]).unwrap(), 1);
        assert!(store.get_by_name(&scope, "stranger").is_err());
    }

    #[test]
    fn test_get_by_name_not_found() {
        let store = test_store();
        let err = store.get_by_name(&Scope::Host, "ghost").unwrap_err();
        assert!(matches!(err, Error::PackageNotFound(name) if name == "ghost"));
    }

    #[test]
    fn test_search_by_name_part() {
        let store = test_store();
        let scope = Scope::Host;
        let mut vim = pkg("vim", "9.0");
        vim.installed = true;
        vim.version_installed = "9.0".to_string();
        store
            .replace_all(&scope, &[vim, pkg("vim-common", "9.0"), pkg("nano", "7.2")])
            .unwrap();

        let hits = store.search(&scope, "vim", false).unwrap();
        assert_eq!(hits.len(), 2);

        let installed_hits = store.search(&scope, "vim", true).unwrap();
        assert_eq!(installed_hits.len(), 1);
        assert_eq!(installed_hits[0].name, "vim");
    }

    #[test]
    fn test_query_with_token_list_filter() {
        let store = test_store();
        let scope = Scope::Host;
        let mut editor = pkg("editor-meta", "1");
        editor.provides = vec!["editor".to_string(), "text-editor".to_string()];
        let mut libfoo = pkg("libfoo", "1");
        libfoo.provides = vec!["libfoo".to_string()];
        store.replace_all(&scope, &[editor, libfoo]).unwrap();

        // Exact token membership: "lib" must not match inside "libfoo"
        let spec = QuerySpec::new().filter(
            PackageField::Provides,
            FilterValue::Text("lib".to_string()),
        );
        assert!(store.query(&scope, &spec).unwrap().is_empty());

        let spec = QuerySpec::new().filter(
            PackageField::Provides,
            FilterValue::Text("editor".to_string()),
        );
        let hits = store.query(&scope, &spec).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "editor-meta");
    }

    #[test]
    fn test_unparseable_boolean_filter_matches_unfiltered_query() {
        let store = test_store();
        let scope = Scope::Host;
        let mut a = pkg("a", "1");
        a.installed = true;
        a.version_installed = "1".to_string();
        store.replace_all(&scope, &[a, pkg("b", "2")]).unwrap();

        let unfiltered = store.query(&scope, &QuerySpec::new()).unwrap();
        let garbage = store
            .query(
                &scope,
                &QuerySpec::new().filter(
                    PackageField::Installed,
                    FilterValue::Text("definitely".to_string()),
                ),
            )
            .unwrap();
        assert_eq!(unfiltered, garbage);
    }

    #[test]
    fn test_query_sort_and_pagination() {
        let store = test_store();
        let scope = Scope::Host;
        store
            .replace_all(&scope, &[pkg("c", "1"), pkg("a", "1"), pkg("b", "1")])
            .unwrap();

        let spec = QuerySpec::new()
            .sort(PackageField::Name, SortOrder::Asc)
            .paginate(2, 1);
        let hits = store.query(&scope, &spec).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name, "b");
        assert_eq!(hits[1].name, "c");
    }

    #[test]
    fn test_update_field_allow_list() {
        let store = test_store();
        let scope = Scope::Host;
        store.replace_all(&scope, &[pkg("a", "1")]).unwrap();

        store
            .update_field(&scope, "a", PackageField::Installed, true)
            .unwrap();
        assert!(store.get_by_name(&scope, "a").unwrap().installed);

        let err = store
            .update_field(&scope, "a", PackageField::Version, true)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidField { .. }));
        // The rejected update must not have executed anything
        assert_eq!(store.get_by_name(&scope, "a").unwrap().version, "1");
    }

    #[test]
    fn test_delete_scope_is_isolated() {
        let store = test_store();
        let host = Scope::Host;
        let container = Scope::Container("dev".to_string());
        store.replace_all(&host, &[pkg("h", "1")]).unwrap();
        store.replace_all(&container, &[pkg("c", "1")]).unwrap();

        store.delete_scope(&container).unwrap();
        assert!(!store.exists(&container).unwrap());
        assert!(store.exists(&host).unwrap());
    }

    #[test]
    fn test_cancel_aborts_replace_and_resets() {
        let store = test_store();
        let scope = Scope::Host;

        store.cancel_handle().store(true, Ordering::Relaxed);
        let err = store.replace_all(&scope, &[pkg("a", "1")]).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
        assert!(!store.exists(&scope).unwrap());

        // The flag is consumed; the next operation runs normally
        store.replace_all(&scope, &[pkg("a", "1")]).unwrap();
        assert_eq!(store.count(&scope, &[]).unwrap(), 1);
    }

    #[test]
    fn test_cancel_aborts_reconcile() {
        let store = test_store();
        let scope = Scope::Host;
        store.replace_all(&scope, &[pkg("a", "1")]).unwrap();

        store.cancel_handle().store(true, Ordering::Relaxed);
        let mut installed = HashMap::new();
        installed.insert("a".to_string(), "1".to_string());
        let err = store.reconcile_installed(&scope, &installed).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));

        // The rolled back reconcile left the flags untouched
        assert!(!store.get_by_name(&scope, "a").unwrap().installed);

        store.reconcile_installed(&scope, &installed).unwrap();
        assert!(store.get_by_name(&scope, "a").unwrap().installed);
    }

    #[test]
    fn test_depends_round_trip_through_storage() {
        let store = test_store();
        let scope = Scope::Host;
        let mut p = pkg("app", "1");
        p.depends = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        store.replace_all(&scope, &[p]).unwrap();

        let loaded = store.get_by_name(&scope, "app").unwrap();
        assert_eq!(loaded.depends, vec!["a", "b", "c"]);
    }
}
