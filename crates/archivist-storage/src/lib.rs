//! Message archive persistence for Archivist.

pub mod db;
