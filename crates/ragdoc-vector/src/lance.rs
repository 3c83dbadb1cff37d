use std::collections::BTreeSet;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Int32Type};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};

use ragdoc_core::config::IndexSettings;
use ragdoc_core::traits::VectorIndex;
use ragdoc_core::types::{Chunk, IndexDescriptor, Metric, RetrievalResult, ScoredChunk};
use ragdoc_core::{Error, Result, META_TABLE};

use crate::schema::chunk_schema;
use crate::table::{delete_meta, ensure_table, get_meta, open_db, set_meta, table_exists};

const BATCH_SIZE: usize = 1000;

fn lance_err(e: lancedb::Error) -> Error {
    Error::backend("lancedb", e)
}

fn descriptor_key(name: &str) -> String {
    format!("descriptor:{}", name)
}

fn active_key(logical: &str) -> String {
    format!("active_index:{}", logical)
}

fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::Cosine => DistanceType::Cosine,
        Metric::L2 => DistanceType::L2,
        Metric::Dot => DistanceType::Dot,
    }
}

/// Vector index service backed by a LanceDB database.
///
/// Every index is one table. Descriptors are stored as JSON in the `meta`
/// table since a Lance schema only carries the vector width.
#[derive(Clone)]
pub struct LanceIndex {
    conn: Connection,
}

impl LanceIndex {
    pub async fn connect(settings: &IndexSettings) -> Result<Self> {
        let conn = open_db(settings).await?;
        tracing::info!(uri = %settings.uri, "connected to lancedb");
        Ok(Self { conn })
    }

    async fn require(&self, name: &str) -> Result<IndexDescriptor> {
        self.describe(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("index '{}'", name)))
    }

    async fn insert_batch(&self, table: &lancedb::Table, dim: usize, rows: &[(&Chunk, &Vec<f32>)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let schema = chunk_schema(dim);
        let vectors = rows.iter().map(|(_, v)| Some(v.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|(c, _)| c.id.as_str()))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|(c, _)| c.doc_name.as_str()))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|(c, _)| c.doc_path.as_str()))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|(c, _)| c.page as i32))),
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|(c, _)| c.chunk_index as i32))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|(c, _)| c.text.as_str()))),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, dim as i32)),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).map_err(|e| Error::backend("arrow", e))?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        table.add(reader).execute().await.map_err(lance_err)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn list(&self) -> Result<BTreeSet<String>> {
        let names = self.conn.table_names().execute().await.map_err(lance_err)?;
        Ok(names.into_iter().filter(|n| n != META_TABLE).collect())
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        if table_exists(&self.conn, name).await? {
            self.conn.drop_table(name, &[]).await.map_err(lance_err)?;
            tracing::info!(index = name, "dropped index");
        }
        delete_meta(&self.conn, &descriptor_key(name)).await?;
        Ok(())
    }

    async fn create(&self, descriptor: &IndexDescriptor) -> Result<()> {
        if let Some(existing) = self.describe(&descriptor.name).await? {
            if existing.dimension != descriptor.dimension {
                return Err(Error::DimensionMismatch { expected: existing.dimension, actual: descriptor.dimension });
            }
            return Ok(());
        }
        // A table without a descriptor is left over from an interrupted create.
        if table_exists(&self.conn, &descriptor.name).await? {
            self.conn.drop_table(&descriptor.name, &[]).await.map_err(lance_err)?;
        }
        ensure_table(&self.conn, &descriptor.name, chunk_schema(descriptor.dimension)).await?;
        let json = serde_json::to_string(descriptor).map_err(|e| Error::backend("descriptor", e))?;
        set_meta(&self.conn, &descriptor_key(&descriptor.name), &json).await?;
        tracing::debug!(index = %descriptor.name, dim = descriptor.dimension, metric = %descriptor.metric, "created index");
        Ok(())
    }

    async fn describe(&self, name: &str) -> Result<Option<IndexDescriptor>> {
        match get_meta(&self.conn, &descriptor_key(name)).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| Error::backend("descriptor", e)),
            None => Ok(None),
        }
    }

    async fn load(&self, name: &str, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
        let descriptor = self.require(name).await?;
        check_rows(&descriptor, chunks, embeddings)?;
        let table = self.conn.open_table(name).execute().await.map_err(lance_err)?;
        table.delete("true").await.map_err(lance_err)?;
        let rows: Vec<(&Chunk, &Vec<f32>)> = chunks.iter().zip(embeddings.iter()).collect();
        for batch in rows.chunks(BATCH_SIZE) {
            self.insert_batch(&table, descriptor.dimension, batch).await?;
        }
        tracing::info!(index = name, rows = rows.len(), "loaded index");
        Ok(())
    }

    async fn search(&self, name: &str, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        let descriptor = self.require(name).await?;
        if vector.len() != descriptor.dimension {
            return Err(Error::DimensionMismatch { expected: descriptor.dimension, actual: vector.len() });
        }
        if k == 0 || self.count(name).await? == 0 {
            return Ok(Vec::new());
        }
        let table = self.conn.open_table(name).execute().await.map_err(lance_err)?;
        let batches: Vec<RecordBatch> = table
            .query()
            .nearest_to(vector)
            .map_err(lance_err)?
            .distance_type(distance_type(descriptor.metric))
            .limit(k)
            .execute()
            .await
            .map_err(lance_err)?
            .try_collect()
            .await
            .map_err(lance_err)?;

        let mut hits = Vec::new();
        for batch in &batches {
            read_hits(batch, descriptor.metric, &mut hits)?;
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, name: &str) -> Result<usize> {
        if !table_exists(&self.conn, name).await? {
            return Err(Error::NotFound(format!("index '{}'", name)));
        }
        let table = self.conn.open_table(name).execute().await.map_err(lance_err)?;
        table.count_rows(None).await.map_err(lance_err)
    }

    async fn set_active(&self, logical: &str, physical: &str) -> Result<()> {
        set_meta(&self.conn, &active_key(logical), physical).await?;
        Ok(())
    }

    async fn active(&self, logical: &str) -> Result<Option<String>> {
        Ok(get_meta(&self.conn, &active_key(logical)).await?)
    }
}

pub(crate) fn check_rows(descriptor: &IndexDescriptor, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != embeddings.len() {
        return Err(Error::InvalidConfig(format!(
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|v| v.len() != descriptor.dimension) {
        return Err(Error::DimensionMismatch { expected: descriptor.dimension, actual: bad.len() });
    }
    Ok(())
}

fn read_hits(batch: &RecordBatch, metric: Metric, out: &mut Vec<ScoredChunk>) -> Result<()> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| Error::backend("lancedb", format!("result column '{}' missing", name)))
    };
    let ids = column("id")?.as_string::<i32>();
    let doc_names = column("doc_name")?.as_string::<i32>();
    let doc_paths = column("doc_path")?.as_string::<i32>();
    let pages = column("page")?.as_primitive::<Int32Type>();
    let indices = column("chunk_index")?.as_primitive::<Int32Type>();
    let texts = column("text")?.as_string::<i32>();
    let distances = column("_distance")?.as_primitive::<Float32Type>();

    for i in 0..batch.num_rows() {
        if !distances.is_valid(i) {
            continue;
        }
        out.push(ScoredChunk {
            chunk: Chunk {
                id: ids.value(i).to_string(),
                doc_name: doc_names.value(i).to_string(),
                doc_path: doc_paths.value(i).to_string(),
                page: pages.value(i) as usize,
                chunk_index: indices.value(i) as usize,
                text: texts.value(i).to_string(),
            },
            score: metric.similarity_from_distance(distances.value(i)),
        });
    }
    Ok(())
}
