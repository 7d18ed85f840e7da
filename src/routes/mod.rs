pub mod headers;
pub mod items;
pub mod record;
pub mod scans;
pub mod verify;
