use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Row layout of an index generation table. `dim` is fixed per table.
pub fn chunk_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("doc_name", DataType::Utf8, false),
		Field::new("doc_path", DataType::Utf8, false),
		Field::new("page", DataType::Int32, false),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true),
	]))
}

pub fn meta_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("key", DataType::Utf8, false),
		Field::new("value", DataType::Utf8, false),
		Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}
