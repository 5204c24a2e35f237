use async_range_reader::config::{ReaderOptions, RuntimeProperties};
use async_range_reader::error::RangeReaderResult;
use async_range_reader::RangeReader;

#[tokio::main]
async fn main() -> RangeReaderResult<()> {
    env_logger::init();

    let hrefs = [
        "https://sentinel-cogs.s3.us-west-2.amazonaws.com/sentinel-s2-l2a-cogs/16/T/CR/2025/3/S2A_16TCR_20250322_0_L2A/B02.tif",
        "https://isdasoil.s3.amazonaws.com/soil_data/bulk_density/bulk_density.tif",
        "s3://isdasoil/covariates/dem_30m/dem_30m.tif",
        "https://service.pdok.nl/rws/ahn/atom/downloads/dtm_05m/M_01GN2.tif",
    ];

    let href = match std::env::args().nth(1) {
        Some(arg) => vec![arg],
        None => hrefs.iter().map(|h| h.to_string()).collect(),
    };

    for href in href {
        println!("processing {href:?}");
        let options = ReaderOptions::new().with_properties(RuntimeProperties::from_env());
        let reader = RangeReader::open(&href, options).await?;
        println!("  url {}", reader.url());

        let header = reader.read_header().await?;
        println!("  header: {} bytes, magic {:?}", header.len(), &header[..4]);

        let windows = reader.read(&[20_000..21_000, 30_000..31_000]).await?;
        for (start, bytes) in &windows {
            println!("  window at {start}: {} bytes", bytes.len());
        }
    }

    Ok(())
}
