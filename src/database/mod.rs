pub mod campaigns;
pub mod contacts;
pub mod send_attempts;
pub mod work_items;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::time::Duration;

pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(database_url);
    options
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10));
    Database::connect(options).await
}

pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm::Statement;

    let backend = db.get_database_backend();

    let sql_statements = vec![
        r#"CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            campaign_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            body_html TEXT NOT NULL,
            from_address TEXT NOT NULL,
            launched_by TEXT NOT NULL,
            to_addresses TEXT NOT NULL,
            cc_addresses TEXT NOT NULL,
            bcc_addresses TEXT NOT NULL,
            target_emails TEXT NOT NULL,
            attachments TEXT NOT NULL,
            total INTEGER NOT NULL,
            sent_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            sent_at BIGINT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS send_attempts (
            token TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL,
            outcome TEXT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_send_attempts_campaign
            ON send_attempts (campaign_id)"#,
        r#"CREATE TABLE IF NOT EXISTS contacts (
            email TEXT PRIMARY KEY,
            first_name TEXT,
            last_name TEXT,
            company TEXT,
            agency_name TEXT,
            extra TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS work_items (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL,
            recipient_address TEXT NOT NULL,
            role TEXT,
            idempotency_token TEXT NOT NULL,
            visible_at BIGINT NOT NULL,
            receive_count INTEGER NOT NULL DEFAULT 0,
            receipt TEXT,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_work_items_visible
            ON work_items (visible_at, created_at)"#,
        r#"CREATE INDEX IF NOT EXISTS idx_work_items_campaign
            ON work_items (campaign_id)"#,
    ];

    for sql in sql_statements {
        let statement = Statement::from_string(backend, sql);
        db.execute(statement).await?;
    }

    Ok(())
}
