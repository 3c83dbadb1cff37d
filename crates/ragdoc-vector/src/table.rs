//! LanceDB connection and housekeeping helpers.
//!
//! Opens local or remote databases, creates empty tables, and manages a small
//! key/value `meta` table holding index descriptors and active-generation
//! pointers.

use anyhow::Result;
use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::sync::Arc;

use ragdoc_core::config::{expand_path, IndexSettings};
use ragdoc_core::META_TABLE;

use crate::schema::meta_schema;

pub const REMOTE_SCHEME: &str = "db://";

pub async fn open_db(settings: &IndexSettings) -> Result<Connection> {
    if settings.uri.starts_with(REMOTE_SCHEME) {
        let mut builder = connect(&settings.uri);
        if let Some(key) = &settings.api_key {
            builder = builder.api_key(key);
        }
        if let Some(region) = &settings.region {
            builder = builder.region(region);
        }
        return Ok(builder.execute().await?);
    }
    let path = expand_path(&settings.uri);
    Ok(connect(path.to_string_lossy().as_ref()).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await?;
    Ok(())
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

pub async fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    ensure_table(conn, META_TABLE, meta_schema()).await?;
    let t = conn.open_table(META_TABLE).execute().await?;
    let rb = RecordBatch::try_new(
        meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), meta_schema()));
    // key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(reader).await?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, META_TABLE).await? {
        return Ok(None);
    }
    let t = conn.open_table(META_TABLE).execute().await?;
    let mut stream = t.query().only_if(format!("key = '{}'", quote(key))).execute().await?;
    while let Some(batch) = stream.try_next().await? {
        if batch.num_rows() == 0 { continue; }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("meta.value column missing"))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}

pub async fn delete_meta(conn: &Connection, key: &str) -> Result<()> {
    if !table_exists(conn, META_TABLE).await? {
        return Ok(());
    }
    let t = conn.open_table(META_TABLE).execute().await?;
    t.delete(&format!("key = '{}'", quote(key))).await?;
    Ok(())
}
