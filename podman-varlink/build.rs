extern crate varlink_generator;

fn main() {
    varlink_generator::cargo_build("src/io.podman.varlink");
}
