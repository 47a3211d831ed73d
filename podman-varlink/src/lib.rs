//! Client for the subset of the `io.podman` varlink interface that pod-unit
//! drives. The bindings are generated at build time from
//! `src/io.podman.varlink`.

#![allow(non_camel_case_types, non_snake_case)]

include!(concat!(env!("OUT_DIR"), "/io.podman.rs"));
