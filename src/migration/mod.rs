use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::prelude::*;
use std::fs::create_dir_all;
use std::{fs, path};

mod m20251101_000001_init;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20251101_000001_init::Migration)]
    }
}

/// 打开（必要时创建）SQLite 数据库文件
pub async fn connect(db_path: &str) -> anyhow::Result<DatabaseConnection> {
    let path = path::Path::new(db_path);
    if !path.exists() {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        fs::write(path, "")?;
    }

    let mut options = ConnectOptions::new(format!("sqlite://{}", db_path));
    options.sqlx_logging(false);

    let db = Database::connect(options).await?;
    Ok(db)
}
