//! VectorStore (C4): upsert-by-id columnar store over a LanceDB table,
//! addressed by a local-or-object-store base URI, with cosine kNN search
//! and a Chroma-style metadata filter (§4.4).

pub mod filter;
mod lance;
pub mod schema;

pub use filter::{Op, Scalar, Term, Where};
pub use lance::Row as VectorRecord;

use crate::embed::Embedder;
use crate::error::{Error, Result};

/// LanceDB v0.15 defaults a bare query to `limit=10`; operations that need
/// "every row" (count, full scan, source deletion) pass this explicitly.
pub const MAX_SCAN_LIMIT: usize = 1_000_000;

/// Per-document metadata passed to `add_documents`. Absent fields take the
/// same defaults as the column they back (empty string / 0 / `"markdown"`).
#[derive(Debug, Clone, Default)]
pub struct DocumentMetadata {
    pub file_path: Option<String>,
    pub section: Option<String>,
    pub chunk_index: Option<i64>,
    pub total_chunks: Option<i64>,
    pub source: Option<String>,
    pub format: Option<String>,
    pub timestamp: Option<String>,
}

pub struct VectorStore {
    conn: lancedb::Connection,
    table: lancedb::Table,
    collection_name: String,
    uri: String,
    vector_dim: i32,
}

impl VectorStore {
    /// Open (or create) the table named `collection_name` at `uri`.
    pub async fn open(uri: &str, collection_name: &str, vector_dim: usize) -> Result<Self> {
        let (conn, table) = lance::open_or_create(uri, collection_name, vector_dim as i32).await?;
        Ok(Self {
            conn,
            table,
            collection_name: collection_name.to_string(),
            uri: uri.to_string(),
            vector_dim: vector_dim as i32,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Build the isolated per-batch URI `{base}/{batch_prefix}{collection_name}_{batch_id}`
    /// under which a sub-job's writes are namespaced away from the canonical
    /// collection until merge (§4.4 Isolation).
    pub fn batch_uri(base: &str, batch_prefix: &str, collection_name: &str, batch_id: &str) -> String {
        format!("{base}/{batch_prefix}{collection_name}_{batch_id}")
    }

    /// Upsert documents by `id`. No-op on empty input. Auto-generates ids
    /// as `doc_{existing_count+i}` when absent; computes embeddings via the
    /// given embedder when absent.
    pub async fn add_documents(
        &self,
        documents: &[String],
        metadatas: Option<&[DocumentMetadata]>,
        ids: Option<Vec<String>>,
        embeddings: Option<Vec<Vec<f32>>>,
        embedder: &Embedder,
    ) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        if let Some(m) = metadatas {
            if m.len() != documents.len() {
                return Err(Error::BadRequest(format!(
                    "number of metadatas ({}) must match number of documents ({})",
                    m.len(),
                    documents.len()
                )));
            }
        }
        if let Some(ref i) = ids {
            if i.len() != documents.len() {
                return Err(Error::BadRequest(format!(
                    "number of ids ({}) must match number of documents ({})",
                    i.len(),
                    documents.len()
                )));
            }
        }
        if let Some(ref e) = embeddings {
            if e.len() != documents.len() {
                return Err(Error::BadRequest(format!(
                    "number of embeddings ({}) must match number of documents ({})",
                    e.len(),
                    documents.len()
                )));
            }
        }

        let ids = match ids {
            Some(ids) => ids,
            None => {
                let existing_count = self.get_document_count().await?;
                (0..documents.len()).map(|i| format!("doc_{}", existing_count + i)).collect()
            }
        };
        let embeddings = match embeddings {
            Some(e) => e,
            None => embedder.embed(documents, true, true)?,
        };

        let rows: Vec<VectorRecord> = ids
            .into_iter()
            .zip(documents.iter())
            .zip(embeddings)
            .enumerate()
            .map(|(i, ((id, text), vector))| {
                let meta = metadatas.and_then(|m| m.get(i)).cloned().unwrap_or_default();
                VectorRecord {
                    id,
                    text: text.clone(),
                    vector,
                    file_path: meta.file_path.unwrap_or_default(),
                    section: meta.section.unwrap_or_default(),
                    chunk_index: meta.chunk_index.unwrap_or(0),
                    total_chunks: meta.total_chunks.unwrap_or(1),
                    source: meta.source.unwrap_or_default(),
                    format: meta.format.unwrap_or_else(|| "markdown".to_string()),
                    timestamp: meta.timestamp.unwrap_or_default(),
                }
            })
            .collect();

        lance::upsert(&self.table, &rows, self.vector_dim).await
    }

    /// Cosine-metric kNN search, ordered by ascending distance. Converts
    /// cosine distance to a similarity score (`1 - distance`) to match
    /// §4.3/§4.4's "higher is more similar" convention for callers.
    pub async fn search_similar(
        &self,
        query: &str,
        n_results: usize,
        where_: Option<&Where>,
        query_embedding: Option<Vec<f32>>,
        embedder: &Embedder,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        let query_embedding = match query_embedding {
            Some(e) => e,
            None => embedder.embed_single(query, false)?,
        };
        let where_sql = where_.map(filter::where_to_sql);
        let hits = lance::vector_search(&self.table, &query_embedding, n_results, where_sql.as_deref()).await?;
        Ok(hits.into_iter().map(|(row, distance)| (row, 1.0 - distance)).collect())
    }

    /// Full scan, then filter by id set membership and/or `where` equality,
    /// then truncate to `limit` (§4.4).
    pub async fn get_documents(
        &self,
        ids: Option<&[String]>,
        where_: Option<&Where>,
        limit: Option<usize>,
    ) -> Result<Vec<VectorRecord>> {
        let rows = match where_ {
            Some(w) => lance::scan_filtered(&self.table, &filter::where_to_sql(w), MAX_SCAN_LIMIT).await?,
            None => lance::scan_all(&self.table, MAX_SCAN_LIMIT).await?,
        };

        let mut rows = match ids {
            Some(ids) => {
                let id_set: std::collections::HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
                rows.into_iter().filter(|r| id_set.contains(r.id.as_str())).collect()
            }
            None => rows,
        };

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// Delete by `id IN (...)` or by the SQL rendering of `where`. At least
    /// one of the two must be given.
    pub async fn delete_documents(&self, ids: Option<&[String]>, where_: Option<&Where>) -> Result<()> {
        let predicate = match (ids, where_) {
            (Some(ids), _) if !ids.is_empty() => {
                let quoted: Vec<String> = ids.iter().map(|i| format!("'{}'", filter::escape_sql(i))).collect();
                format!("{} IN ({})", schema::ID, quoted.join(", "))
            }
            (_, Some(w)) => filter::where_to_sql(w),
            _ => {
                return Err(Error::BadRequest(
                    "delete_documents requires either 'ids' or 'where'".to_string(),
                ))
            }
        };
        lance::delete(&self.table, &predicate).await
    }

    /// Delete all rows whose `file_path` matches. Returns the count deleted.
    pub async fn delete_by_file_path(&self, file_path: &str) -> Result<usize> {
        let rows = lance::scan_all(&self.table, MAX_SCAN_LIMIT).await?;
        let count = rows.iter().filter(|r| r.file_path == file_path).count();
        if count == 0 {
            return Ok(0);
        }
        let predicate = format!("{} = '{}'", schema::FILE_PATH, filter::escape_sql(file_path));
        lance::delete(&self.table, &predicate).await?;
        Ok(count)
    }

    pub async fn get_document_count(&self) -> Result<usize> {
        lance::count_rows(&self.table).await
    }

    /// Drop and recreate the table (all data removed).
    pub async fn reset(&mut self) -> Result<()> {
        self.table = lance::drop_and_recreate(&self.conn, &self.collection_name, self.vector_dim).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_uri_namespaces_under_base() {
        let uri = VectorStore::batch_uri("gs://bucket/lancedb", "batch_", "thoth_documents", "job123_0001");
        assert_eq!(uri, "gs://bucket/lancedb/batch_thoth_documents_job123_0001");
    }

    #[test]
    fn document_metadata_defaults_are_empty() {
        let meta = DocumentMetadata::default();
        assert!(meta.file_path.is_none());
        assert!(meta.format.is_none());
    }
}
