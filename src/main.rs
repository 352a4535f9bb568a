fn main() {
    if let Err(e) = lexitale_lib::run() {
        eprintln!("lexitale error: {e:#}");
        std::process::exit(1);
    }
}
