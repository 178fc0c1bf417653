//! Canonical Arrow schema for the vector store's document table (§4.4).

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

pub const ID: &str = "id";
pub const TEXT: &str = "text";
pub const VECTOR: &str = "vector";
pub const FILE_PATH: &str = "file_path";
pub const SECTION: &str = "section";
pub const CHUNK_INDEX: &str = "chunk_index";
pub const TOTAL_CHUNKS: &str = "total_chunks";
pub const SOURCE: &str = "source";
pub const FORMAT: &str = "format";
pub const TIMESTAMP: &str = "timestamp";

/// All scalar metadata columns, in schema order (excludes `id`, `text`, `vector`).
pub const METADATA_COLUMNS: [&str; 7] =
    [FILE_PATH, SECTION, CHUNK_INDEX, TOTAL_CHUNKS, SOURCE, FORMAT, TIMESTAMP];

pub fn document_schema(vector_dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(ID, DataType::Utf8, false),
        Field::new(TEXT, DataType::Utf8, false),
        Field::new(
            VECTOR,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim),
            false,
        ),
        Field::new(FILE_PATH, DataType::Utf8, false),
        Field::new(SECTION, DataType::Utf8, false),
        Field::new(CHUNK_INDEX, DataType::Int64, false),
        Field::new(TOTAL_CHUNKS, DataType::Int64, false),
        Field::new(SOURCE, DataType::Utf8, false),
        Field::new(FORMAT, DataType::Utf8, false),
        Field::new(TIMESTAMP, DataType::Utf8, false),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_ten_columns_in_spec_order() {
        let schema = document_schema(384);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec![ID, TEXT, VECTOR, FILE_PATH, SECTION, CHUNK_INDEX, TOTAL_CHUNKS, SOURCE, FORMAT, TIMESTAMP]
        );
    }

    #[test]
    fn vector_field_carries_the_requested_dimension() {
        let schema = document_schema(768);
        let DataType::FixedSizeList(_, dim) = schema.field_with_name(VECTOR).unwrap().data_type() else {
            panic!("vector column is not a FixedSizeList");
        };
        assert_eq!(*dim, 768);
    }
}
