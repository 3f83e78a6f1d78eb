use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use summary_core::SummaryConfig;
use summary_fhir::CompositionBuilder;

#[derive(Parser, Debug)]
#[command(
    name = "summary-cli",
    about = "Tạo document bundle tóm tắt bệnh án từ bundle FHIR JSON."
)]
struct Args {
    /// Đường dẫn tới file JSON bundle đầu vào.
    #[arg(short, long)]
    input: PathBuf,

    /// Định danh tổ chức giữ tài liệu.
    #[arg(long, default_value = "example-organization")]
    org_id: String,

    /// Tên hiển thị của tổ chức.
    #[arg(long, default_value = "Example Organization")]
    org_name: String,

    /// URL gốc để sinh tham chiếu nội bộ trong bundle.
    #[arg(long, default_value = "https://fhir.example.org/")]
    base_url: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Không đọc được file {:?}", args.input))?;
    let bundle: serde_json::Value = serde_json::from_str(&data)
        .with_context(|| format!("JSON không hợp lệ trong {:?}", args.input))?;

    let config = SummaryConfig::default();
    let mut builder = CompositionBuilder::new();
    builder.read_bundle(&bundle, &config)?;
    let document = builder.build_bundle(&args.org_id, &args.org_name, &args.base_url, &config)?;

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}
