//! LanceDB connection and table plumbing underneath the vector store's
//! public API. Kept separate from `mod.rs` so the Arrow/LanceDB wire
//! details don't leak into the §4.4 contract surface.

use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};

use crate::error::{Error, Result};

use super::schema::{self, document_schema};

/// A single row of the canonical document table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub file_path: String,
    pub section: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub source: String,
    pub format: String,
    pub timestamp: String,
}

/// Open-or-create the table at `uri` named `collection_name`. If creation
/// races with another opener ("already exists" under object-store eventual
/// consistency), fall back to opening (§4.4 opening semantics).
pub async fn open_or_create(uri: &str, collection_name: &str, vector_dim: i32) -> Result<(Connection, Table)> {
    let conn = connect(uri)
        .execute()
        .await
        .map_err(|e| Error::ObjectStoreError(format!("failed to connect to '{uri}': {e}")))?;

    let existing_names = conn.table_names().execute().await.unwrap_or_default();
    if existing_names.iter().any(|n| n == collection_name) {
        let table = conn.open_table(collection_name).execute().await?;
        return Ok((conn, table));
    }

    let schema = document_schema(vector_dim);
    match conn.create_empty_table(collection_name, schema).execute().await {
        Ok(table) => Ok((conn, table)),
        Err(e) if e.to_string().contains("already exists") => {
            let table = conn.open_table(collection_name).execute().await?;
            Ok((conn, table))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn rows_to_batch(rows: &[Row], vector_dim: i32) -> Result<RecordBatch> {
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
    let file_paths: Vec<&str> = rows.iter().map(|r| r.file_path.as_str()).collect();
    let sections: Vec<&str> = rows.iter().map(|r| r.section.as_str()).collect();
    let chunk_indexes: Vec<i64> = rows.iter().map(|r| r.chunk_index).collect();
    let total_chunks: Vec<i64> = rows.iter().map(|r| r.total_chunks).collect();
    let sources: Vec<&str> = rows.iter().map(|r| r.source.as_str()).collect();
    let formats: Vec<&str> = rows.iter().map(|r| r.format.as_str()).collect();
    let timestamps: Vec<&str> = rows.iter().map(|r| r.timestamp.as_str()).collect();
    let flat_vectors: Vec<f32> = rows.iter().flat_map(|r| r.vector.iter().copied()).collect();

    let schema = document_schema(vector_dim);
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(arrow_array::FixedSizeListArray::new(
                Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true)),
                vector_dim,
                Arc::new(Float32Array::from(flat_vectors)),
                None,
            )),
            Arc::new(StringArray::from(file_paths)),
            Arc::new(StringArray::from(sections)),
            Arc::new(Int64Array::from(chunk_indexes)),
            Arc::new(Int64Array::from(total_chunks)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(formats)),
            Arc::new(StringArray::from(timestamps)),
        ],
    )
    .map_err(|e| Error::FatalInternal(format!("failed to build record batch: {e}")))?;

    Ok(batch)
}

/// Upsert rows by `id`: existing rows are replaced in place, new ones
/// inserted (§4.4 `add_documents`).
pub async fn upsert(table: &Table, rows: &[Row], vector_dim: i32) -> Result<()> {
    let batch = rows_to_batch(rows, vector_dim)?;
    let schema = document_schema(vector_dim);
    let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

    let mut merge_insert = table.merge_insert(&[schema::ID]);
    merge_insert.when_matched_update_all(None).when_not_matched_insert_all();
    merge_insert
        .execute(Box::new(batches))
        .await
        .map_err(|e| Error::ObjectStoreError(format!("upsert failed: {e}")))?;

    Ok(())
}

/// Row count of the table. The teacher's Rust plumbing only confirmed a
/// scan-and-count path (no `count_rows` call site in the retrieved pack),
/// so this mirrors that rather than assuming an unverified API.
pub async fn count_rows(table: &Table) -> Result<usize> {
    let results = table.query().limit(super::MAX_SCAN_LIMIT).execute().await?;
    let batches: Vec<RecordBatch> = results.try_collect().await?;
    Ok(batches.iter().map(|b| b.num_rows()).sum())
}

pub async fn scan_all(table: &Table, limit: usize) -> Result<Vec<Row>> {
    let results = table.query().limit(limit).execute().await?;
    let batches: Vec<RecordBatch> = results.try_collect().await?;
    Ok(batches.iter().flat_map(|b| extract_rows(b)).collect())
}

pub async fn scan_filtered(table: &Table, where_sql: &str, limit: usize) -> Result<Vec<Row>> {
    let results = table.query().only_if(where_sql.to_string()).limit(limit).execute().await?;
    let batches: Vec<RecordBatch> = results.try_collect().await?;
    Ok(batches.iter().flat_map(|b| extract_rows(b)).collect())
}

/// Cosine-metric kNN search, optionally filtered by a rendered SQL `where`
/// clause. Returns rows paired with their cosine distance (ascending).
pub async fn vector_search(
    table: &Table,
    query_embedding: &[f32],
    limit: usize,
    where_sql: Option<&str>,
) -> Result<Vec<(Row, f32)>> {
    let mut query = table
        .vector_search(query_embedding.to_vec())
        .map_err(|e| Error::FatalInternal(format!("failed to build vector search: {e}")))?
        .distance_type(DistanceType::Cosine)
        .limit(limit);

    if let Some(sql) = where_sql {
        query = query.only_if(sql.to_string());
    }

    let results = query.execute().await?;
    let batches: Vec<RecordBatch> = results.try_collect().await?;

    let mut out = Vec::new();
    for batch in &batches {
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
        for (i, row) in extract_rows(batch).into_iter().enumerate() {
            let distance = distances.map(|d| d.value(i)).unwrap_or(0.0);
            out.push((row, distance));
        }
    }
    Ok(out)
}

pub async fn delete(table: &Table, predicate: &str) -> Result<()> {
    table.delete(predicate).await?;
    Ok(())
}

pub async fn drop_and_recreate(conn: &Connection, collection_name: &str, vector_dim: i32) -> Result<Table> {
    conn.drop_table(collection_name).await.ok();
    let schema = document_schema(vector_dim);
    let table = conn.create_empty_table(collection_name, schema).execute().await?;
    Ok(table)
}

fn extract_rows(batch: &RecordBatch) -> Vec<Row> {
    let col_str = |name: &str| batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let col_i64 = |name: &str| batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int64Array>());

    let ids = col_str(schema::ID);
    let texts = col_str(schema::TEXT);
    let vectors = batch.column_by_name(schema::VECTOR).and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
    let file_paths = col_str(schema::FILE_PATH);
    let sections = col_str(schema::SECTION);
    let chunk_indexes = col_i64(schema::CHUNK_INDEX);
    let total_chunks = col_i64(schema::TOTAL_CHUNKS);
    let sources = col_str(schema::SOURCE);
    let formats = col_str(schema::FORMAT);
    let timestamps = col_str(schema::TIMESTAMP);

    let (Some(ids), Some(texts)) = (ids, texts) else {
        return Vec::new();
    };

    let vector_at = |i: usize| -> Vec<f32> {
        let Some(vectors) = vectors else { return Vec::new() };
        let values = vectors.value(i);
        match values.as_any().downcast_ref::<Float32Array>() {
            Some(floats) => floats.values().to_vec(),
            None => Vec::new(),
        }
    };

    (0..batch.num_rows())
        .map(|i| Row {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            vector: vector_at(i),
            file_path: file_paths.map(|c| c.value(i).to_string()).unwrap_or_default(),
            section: sections.map(|c| c.value(i).to_string()).unwrap_or_default(),
            chunk_index: chunk_indexes.map(|c| c.value(i)).unwrap_or(0),
            total_chunks: total_chunks.map(|c| c.value(i)).unwrap_or(0),
            source: sources.map(|c| c.value(i).to_string()).unwrap_or_default(),
            format: formats.map(|c| c.value(i).to_string()).unwrap_or_default(),
            timestamp: timestamps.map(|c| c.value(i).to_string()).unwrap_or_default(),
        })
        .collect()
}
