#[actix_web::main]
async fn main() -> std::io::Result<()> {
    reportgen_server::run().await
}
