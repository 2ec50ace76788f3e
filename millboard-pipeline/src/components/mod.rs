pub mod endpoint_source;
pub mod field_filter;
pub mod page_selector;
pub mod search_filter;
