/// PostgreSQL destination.
///
/// Every `append` is self-contained: open the tunnel (if configured), open a
/// connection, insert the partition inside one transaction, commit, and drop
/// both before returning. Nothing is pooled across partitions.

use postgres::types::ToSql;
use postgres::{Client, NoTls};
use std::time::Duration;

use super::tunnel::SshTunnel;
use super::{Destination, LoadError};
use crate::config::{DbSettings, TunnelSettings};
use crate::model::{canonical_columns, CanonicalRow};
use crate::stations::is_valid_table_name;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const TUNNEL_TIMEOUT: Duration = Duration::from_secs(15);

pub struct PostgresDestination {
    db: DbSettings,
    tunnel: Option<TunnelSettings>,
}

impl PostgresDestination {
    pub fn new(db: DbSettings, tunnel: Option<TunnelSettings>) -> Self {
        Self { db, tunnel }
    }

    fn connect(&self, host: &str, port: u16) -> Result<Client, LoadError> {
        postgres::Config::new()
            .host(host)
            .port(port)
            .user(&self.db.user)
            .password(&self.db.password)
            .dbname(&self.db.dbname)
            .connect_timeout(CONNECT_TIMEOUT)
            .connect(NoTls)
            .map_err(|e| LoadError::Connect(e.to_string()))
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `INSERT` for one canonical row into `table`. Column names are the
/// canonical names lower-cased (`spi1` … `spi24`).
pub fn insert_statement(table: &str) -> String {
    let table = table.split('.').map(quote_ident).collect::<Vec<_>>().join(".");
    let columns = canonical_columns();
    let names: Vec<String> = columns
        .iter()
        .map(|c| quote_ident(&c.to_ascii_lowercase()))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        placeholders.join(", ")
    )
}

impl Destination for PostgresDestination {
    fn append(&mut self, table: &str, rows: &[CanonicalRow]) -> Result<u64, LoadError> {
        if !is_valid_table_name(table) {
            return Err(LoadError::InvalidTable(table.to_string()));
        }

        // Declared before the client so the connection closes first
        let tunnel = match &self.tunnel {
            Some(settings) => Some(SshTunnel::open(
                settings,
                &self.db.host,
                self.db.port,
                TUNNEL_TIMEOUT,
            )?),
            None => None,
        };
        let mut client = match &tunnel {
            Some(t) => self.connect("127.0.0.1", t.local_port())?,
            None => self.connect(&self.db.host, self.db.port)?,
        };

        let write = |e: postgres::Error| LoadError::Write(e.to_string());
        let mut tx = client.transaction().map_err(write)?;
        let statement = tx.prepare(&insert_statement(table)).map_err(write)?;

        let mut written = 0;
        for row in rows {
            let mut params: Vec<&(dyn ToSql + Sync)> =
                vec![&row.station_id, &row.station_name, &row.observed_date];
            for value in &row.indicators {
                params.push(value);
            }
            written += tx.execute(&statement, &params).map_err(write)?;
        }
        tx.commit().map_err(write)?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_statement_lists_canonical_columns() {
        let sql = insert_statement("drought_impact_chuncheon_spi_index");
        assert!(sql.starts_with("INSERT INTO \"drought_impact_chuncheon_spi_index\" (\"station_id\""));
        assert!(sql.contains("\"spi24\""));
        assert!(sql.ends_with("$13)"));
    }

    #[test]
    fn test_insert_statement_quotes_schema_separately() {
        let sql = insert_statement("spi.chuncheon");
        assert!(sql.starts_with("INSERT INTO \"spi\".\"chuncheon\" "));
    }

    #[test]
    fn test_ddl_matches_insert_and_allows_repeat_appends() {
        let ddl = std::fs::read_to_string("sql/001_drought_spi_tables.sql")
            .expect("DDL file should be readable");
        let upper = ddl.to_ascii_uppercase();
        assert!(!upper.contains("PRIMARY KEY"));
        assert!(!upper.contains("UNIQUE"));
        for column in canonical_columns() {
            let column = column.to_ascii_lowercase();
            assert!(
                ddl.lines().any(|l| l.trim_start().starts_with(&format!("{} ", column))),
                "column {} missing from DDL",
                column
            );
        }
    }

    #[test]
    fn test_invalid_table_rejected_before_connecting() {
        let mut dest = PostgresDestination::new(
            DbSettings {
                host: "unreachable.invalid".into(),
                port: 5432,
                user: "u".into(),
                password: "p".into(),
                dbname: "d".into(),
            },
            None,
        );
        let err = dest.append("x; DROP TABLE y", &[]).unwrap_err();
        assert!(matches!(err, LoadError::InvalidTable(_)));
    }

    #[test]
    #[ignore] // Needs DB_* in .env and the tables from sql/001_drought_spi_tables.sql
    fn test_append_against_live_database() {
        use crate::model::INDICATOR_COUNT;
        use chrono::NaiveDate;

        dotenv::dotenv().ok();
        let db = DbSettings::from_env().expect("DB_* must be set");
        let tunnel = TunnelSettings::from_env().expect("SSH_* must be complete if set");
        let mut dest = PostgresDestination::new(db, tunnel);

        let row = CanonicalRow {
            station_id: 101,
            station_name: "춘천".into(),
            observed_date: NaiveDate::from_ymd_opt(1999, 1, 1).unwrap(),
            indicators: [Some(0.0); INDICATOR_COUNT],
        };
        let written = dest
            .append("drought_impact_chuncheon_spi_index", &[row])
            .expect("append should succeed");
        assert_eq!(written, 1);
    }
}
