pub mod compress;
pub mod error;
pub mod generate;
pub mod join;
pub mod patch;
pub mod secrets;
pub mod version;

pub use compress::{compress, decompress, sha256_hex};
pub use error::GenError;
pub use generate::{generate, install_image_ref, GenerationInput};
pub use join::render_join_document;
pub use secrets::SecretBundle;
pub use version::{at_least, parse_version};
