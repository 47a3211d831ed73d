mod build_script;

pub use build_script::BuildScriptFrontend;
