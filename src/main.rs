fn main() {
    if let Err(err) = stepsync_lib::run() {
        eprintln!("stepsync: {err:#}");
        std::process::exit(1);
    }
}
