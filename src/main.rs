fn main() {
    if let Err(err) = hostaudit::cli::run() {
        hostaudit::ui::eprintln_error(&err);
        std::process::exit(hostaudit::exit::exit_code(&err));
    }
}
