// "operating system" for the XTEink X4 (ESP32-C3, e-paper)

#![no_std]

extern crate alloc;

pub mod apps;
pub mod board;
pub mod calibre;
pub mod content;
pub mod drivers;
pub mod error;
pub mod fonts;
pub mod formats;
pub mod kernel;
pub mod page;
pub mod pagecache;
pub mod ui;
