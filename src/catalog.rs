//! Index catalog.
//!
//! The catalog is a single small table (`__Indexes`) enumerating every
//! index, its schema, and its lifecycle state, plus the DDL for the
//! per-index row tables. All SQL is dialect-neutral between MySQL and
//! SQLite, so the same code serves production and tests through the sqlx
//! `Any` driver.

use std::sync::Once;

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, info};

use crate::error::{BioIndexError, Result};
use crate::schema::Schema;

/// An index declaration: immutable once created, except for the lifecycle
/// flags mutated through the catalog.
#[derive(Clone, Debug)]
pub struct IndexSpec {
    /// Unique index name.
    pub name: String,
    /// Display name for the GraphQL collaborator; opaque to the engine.
    pub schema_name: String,
    /// S3 key prefix the shards live under, ending in `/`.
    pub prefix: String,
    /// Key schema records are sorted and indexed by.
    pub schema: Schema,
    /// True once a build has completed cleanly.
    pub built: bool,
    /// True when the shards are BGZF-compressed.
    pub compressed: bool,
}

impl IndexSpec {
    /// Create a new declaration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the prefix does not end in `/`;
    /// `MalformedSchema` if the schema string does not parse.
    pub fn new(name: &str, prefix: &str, schema_str: &str) -> Result<IndexSpec> {
        if !prefix.ends_with('/') {
            return Err(BioIndexError::invalid_config(format!(
                "prefix must end with '/': {}",
                prefix
            )));
        }

        Ok(IndexSpec {
            name: name.to_string(),
            schema_name: cap_case_str(name),
            prefix: prefix.to_string(),
            schema: Schema::parse(schema_str)?,
            built: false,
            compressed: false,
        })
    }

    /// Name of this index's row table.
    pub fn table_name(&self) -> String {
        cap_case_str(&self.name)
    }
}

/// Catalog of all indexes, backed by the relational database.
pub struct Catalog {
    pool: AnyPool,
}

impl Catalog {
    /// Connect to the database and make sure the catalog table exists.
    pub async fn connect(database_url: &str) -> Result<Catalog> {
        static DRIVERS: Once = Once::new();
        DRIVERS.call_once(sqlx::any::install_default_drivers);

        // SQLite permits limited write concurrency, and an in-memory
        // database lives only as long as its connection; a single pinned
        // connection serves both. MySQL gets a real pool.
        let max_connections = if database_url.starts_with("sqlite") {
            1
        } else {
            16
        };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `__Indexes` ( \
               `name` VARCHAR(200) NOT NULL PRIMARY KEY, \
               `schema_name` VARCHAR(200) NOT NULL, \
               `prefix` VARCHAR(1024) NOT NULL, \
               `schema` VARCHAR(200) NOT NULL, \
               `built` INTEGER NOT NULL DEFAULT 0, \
               `compressed` INTEGER NOT NULL DEFAULT 0, \
               `building` INTEGER NOT NULL DEFAULT 0 \
             )",
        )
        .execute(&pool)
        .await?;

        Ok(Catalog { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Atomically replace an index declaration.
    ///
    /// Any previous row table is dropped in the same transaction so a
    /// later build starts from empty; the lifecycle flags reset.
    pub async fn put(&self, spec: &IndexSpec) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "REPLACE INTO `__Indexes` \
             (`name`, `schema_name`, `prefix`, `schema`, `built`, `compressed`, `building`) \
             VALUES (?, ?, ?, ?, 0, 0, 0)",
        )
        .bind(&spec.name)
        .bind(&spec.schema_name)
        .bind(&spec.prefix)
        .bind(spec.schema.schema_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&spec.table_name())?
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(index = %spec.name, schema = %spec.schema, "index created");
        Ok(())
    }

    /// Look up an index by name.
    pub async fn get(&self, name: &str) -> Result<IndexSpec> {
        let row = sqlx::query(
            "SELECT `name`, `schema_name`, `prefix`, `schema`, `built`, `compressed` \
             FROM `__Indexes` WHERE `name` = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => spec_of_row(&row),
            None => Err(BioIndexError::UnknownIndex {
                name: name.to_string(),
            }),
        }
    }

    /// All indexes, sorted by name.
    pub async fn list(&self) -> Result<Vec<IndexSpec>> {
        let rows = sqlx::query(
            "SELECT `name`, `schema_name`, `prefix`, `schema`, `built`, `compressed` \
             FROM `__Indexes` ORDER BY `name`",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(spec_of_row).collect()
    }

    /// Remove an index and its row table.
    pub async fn drop(&self, name: &str) -> Result<()> {
        let spec = self.get(name).await?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM `__Indexes` WHERE `name` = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&spec.table_name())?
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Set the built flag.
    pub async fn set_built(&self, name: &str, built: bool) -> Result<()> {
        self.set_flag(name, "built", built).await
    }

    /// Set the compressed flag.
    pub async fn set_compressed(&self, name: &str, compressed: bool) -> Result<()> {
        self.set_flag(name, "compressed", compressed).await
    }

    async fn set_flag(&self, name: &str, flag: &str, value: bool) -> Result<()> {
        // existence check first; MySQL reports zero affected rows for a
        // no-change update, so rows_affected can't distinguish the cases
        self.get(name).await?;

        sqlx::query(&format!(
            "UPDATE `__Indexes` SET `{}` = ? WHERE `name` = ?",
            flag
        ))
        .bind(i32::from(value))
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Claim the build lock for an index.
    ///
    /// Returns false when another build of the same index is running.
    pub(crate) async fn try_begin_build(&self, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE `__Indexes` SET `building` = 1, `built` = 0 \
             WHERE `name` = ? AND `building` = 0",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the build lock, recording whether the build succeeded.
    pub(crate) async fn end_build(&self, name: &str, built: bool) -> Result<()> {
        sqlx::query("UPDATE `__Indexes` SET `building` = 0, `built` = ? WHERE `name` = ?")
            .bind(i32::from(built))
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create an index's row table and its indexes if absent.
    pub(crate) async fn ensure_index_table(&self, spec: &IndexSpec) -> Result<()> {
        let table = quote_ident(&spec.table_name())?;

        let mut columns: Vec<String> = Vec::new();
        for part in spec.schema.key_parts() {
            columns.push(format!("{} VARCHAR(200) NOT NULL", quote_ident(&part.column())?));
        }
        if spec.schema.has_locus() {
            columns.push("`chromosome` VARCHAR(4) NOT NULL".to_string());
            columns.push("`start` BIGINT NOT NULL".to_string());
            columns.push("`end` BIGINT NOT NULL".to_string());
        }
        columns.push("`path` VARCHAR(1024) NOT NULL".to_string());
        columns.push("`start_offset` BIGINT NOT NULL".to_string());
        columns.push("`end_offset` BIGINT NOT NULL".to_string());

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            columns.join(", ")
        ))
        .execute(&self.pool)
        .await?;

        // the composite b-tree serving both exact and locus predicates
        let mut index_columns: Vec<String> = spec
            .schema
            .key_parts()
            .iter()
            .map(|part| quote_ident(&part.column()))
            .collect::<Result<_>>()?;
        if spec.schema.has_locus() {
            index_columns.push("`chromosome`".to_string());
            index_columns.push("`end`".to_string());
        }
        self.create_index_if_absent(
            &format!("{}_schema_idx", spec.table_name()),
            &spec.table_name(),
            &index_columns,
        )
        .await?;

        // secondary keys index for prefix-match listings
        if spec.schema.has_locus() && !spec.schema.key_parts().is_empty() {
            let key_columns: Vec<String> = spec
                .schema
                .key_parts()
                .iter()
                .map(|part| quote_ident(&part.column()))
                .collect::<Result<_>>()?;
            self.create_index_if_absent(
                &format!("{}_keys_idx", spec.table_name()),
                &spec.table_name(),
                &key_columns,
            )
            .await?;
        }

        Ok(())
    }

    async fn create_index_if_absent(
        &self,
        index_name: &str,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let sql = format!(
            "CREATE INDEX {} ON {} ({})",
            quote_ident(index_name)?,
            quote_ident(table)?,
            columns.join(", ")
        );

        // MySQL has no CREATE INDEX IF NOT EXISTS; a duplicate is fine
        if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
            let message = e.to_string().to_lowercase();
            if message.contains("exist") || message.contains("duplicate") {
                debug!(index = index_name, "index already present");
            } else {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

fn spec_of_row(row: &sqlx::any::AnyRow) -> Result<IndexSpec> {
    Ok(IndexSpec {
        name: row.try_get::<String, _>("name")?,
        schema_name: row.try_get::<String, _>("schema_name")?,
        prefix: row.try_get::<String, _>("prefix")?,
        schema: Schema::parse(&row.try_get::<String, _>("schema")?)?,
        built: row.try_get::<i64, _>("built")? != 0,
        compressed: row.try_get::<i64, _>("compressed")? != 0,
    })
}

/// Quote an identifier with backticks, which both MySQL and SQLite accept.
pub(crate) fn quote_ident(ident: &str) -> Result<String> {
    if ident.contains('`') {
        return Err(BioIndexError::malformed_schema(format!(
            "bad identifier: {}",
            ident
        )));
    }
    Ok(format!("`{}`", ident))
}

/// Translate a string like `"foo_Bar-baz whee"` into `"FooBarBazWhee"`.
pub(crate) fn cap_case_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            boundary = false;
        } else {
            boundary = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_catalog() -> Catalog {
        Catalog::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_cap_case_str() {
        assert_eq!(cap_case_str("foo_Bar-baz  whee"), "FooBarBazWhee");
        assert_eq!(cap_case_str("gene"), "Gene");
        assert_eq!(cap_case_str("t2d-associations"), "T2dAssociations");
    }

    #[test]
    fn test_spec_validation() {
        assert!(IndexSpec::new("idx", "genes", "phenotype").is_err()); // no slash
        assert!(IndexSpec::new("idx", "genes/", "chr:pos,extra").is_err());
        let spec = IndexSpec::new("gene-assoc", "genes/", "phenotype").unwrap();
        assert_eq!(spec.table_name(), "GeneAssoc");
        assert_eq!(spec.schema_name, "GeneAssoc");
    }

    #[tokio::test]
    async fn test_put_get_list_drop() {
        let catalog = test_catalog().await;

        let spec = IndexSpec::new("assoc", "assoc/", "phenotype,chromosome:position").unwrap();
        catalog.put(&spec).await.unwrap();

        let fetched = catalog.get("assoc").await.unwrap();
        assert_eq!(fetched.name, "assoc");
        assert_eq!(fetched.prefix, "assoc/");
        assert!(!fetched.built);
        assert!(!fetched.compressed);
        assert!(fetched.schema.has_locus());

        let all = catalog.list().await.unwrap();
        assert_eq!(all.len(), 1);

        catalog.drop("assoc").await.unwrap();
        assert!(matches!(
            catalog.get("assoc").await,
            Err(BioIndexError::UnknownIndex { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_drops_row_table() {
        let catalog = test_catalog().await;

        let spec = IndexSpec::new("genes", "genes/", "name").unwrap();
        catalog.put(&spec).await.unwrap();
        catalog.ensure_index_table(&spec).await.unwrap();

        sqlx::query("INSERT INTO `Genes` (`name`, `path`, `start_offset`, `end_offset`) VALUES ('a', 'p', 0, 10)")
            .execute(catalog.pool())
            .await
            .unwrap();

        // replacing the spec drops the old rows with the table
        catalog.put(&spec).await.unwrap();
        catalog.ensure_index_table(&spec).await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM `Genes`")
            .fetch_one(catalog.pool())
            .await
            .map(|row| row.try_get("n").unwrap())
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_flags() {
        let catalog = test_catalog().await;
        let spec = IndexSpec::new("genes", "genes/", "name").unwrap();
        catalog.put(&spec).await.unwrap();

        catalog.set_built("genes", true).await.unwrap();
        catalog.set_compressed("genes", true).await.unwrap();
        let fetched = catalog.get("genes").await.unwrap();
        assert!(fetched.built);
        assert!(fetched.compressed);

        assert!(catalog.set_built("nope", true).await.is_err());
    }

    #[tokio::test]
    async fn test_build_lock() {
        let catalog = test_catalog().await;
        let spec = IndexSpec::new("genes", "genes/", "name").unwrap();
        catalog.put(&spec).await.unwrap();

        assert!(catalog.try_begin_build("genes").await.unwrap());
        assert!(!catalog.try_begin_build("genes").await.unwrap());

        catalog.end_build("genes", true).await.unwrap();
        assert!(catalog.get("genes").await.unwrap().built);
        assert!(catalog.try_begin_build("genes").await.unwrap());
    }

    #[tokio::test]
    async fn test_interchangeable_key_column() {
        let catalog = test_catalog().await;
        let spec = IndexSpec::new("vars", "vars/", "varId|dbSNP").unwrap();
        catalog.put(&spec).await.unwrap();
        catalog.ensure_index_table(&spec).await.unwrap();

        // the disjunction is a single quoted column
        sqlx::query("INSERT INTO `Vars` (`varId|dbSNP`, `path`, `start_offset`, `end_offset`) VALUES ('rs1', 'p', 0, 5)")
            .execute(catalog.pool())
            .await
            .unwrap();
    }
}
