pub mod client;

pub use client::{Auth, AuthMap, Client, Error, Manifest, RatelimitMap, RawManifest};
