pub fn setup_logs() {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();
}
