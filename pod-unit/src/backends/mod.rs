mod podman;

pub use podman::PodmanBackend;

#[cfg(test)]
pub mod fake;
