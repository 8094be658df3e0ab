#![allow(dead_code)]

pub mod adapter;
pub mod store_dir;
