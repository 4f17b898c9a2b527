//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements   | Connects to                   |
//! |----------------|--------------|-------------------------------|
//! | `json_lines`   | Transport    | any `Read`/`Write` pair       |
//! | `log_sink`     | EventSink    | `log` facade                  |
//! | `time`         | Clock        | `std::time::Instant`          |

pub mod json_lines;
pub mod log_sink;
pub mod time;
