pub mod run;

/// Print the tool version
pub fn version() {
    println!("nc-hammer {}", env!("CARGO_PKG_VERSION"));
}
