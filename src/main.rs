fn main() {
    if let Err(err) = csv_glyph::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
