pub mod media_items;
pub mod saved_sets;
