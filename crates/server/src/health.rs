pub(crate) async fn health() -> &'static str {
    "OK"
}

pub(crate) async fn index() -> String {
    format!("cco {}", env!("CARGO_PKG_VERSION"))
}
