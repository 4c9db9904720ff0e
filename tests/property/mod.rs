//! Property-based tests for scene ids and cache bounds

mod scene_id;
