pub mod date_parser;
pub mod embedding_service;
pub mod extraction_service;
pub mod icon_service;
pub mod indexing_service;
pub mod pipeline_service;
pub mod search_service;
pub mod supervised;
pub mod text_cleaner;
pub mod tokenizer;
pub mod vector_index;
