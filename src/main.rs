use std::io::SeekFrom;
use std::sync::Arc;

use pageblob_fs::{BlobFileStreamProvider, BlobFsConfig, FileAccess, FileMode, MemoryContainer, OpenOptions};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = BlobFsConfig::from_env()?;
    let provider = if config.connection_string.is_some() {
        info!("Using Azure container {}", config.container);
        BlobFileStreamProvider::from_config(&config)?
    } else {
        info!("No connection string set, using in-memory container {}", config.container);
        BlobFileStreamProvider::with_config(Arc::new(MemoryContainer::new(&config.container)), &config)
    };

    println!("\nPageBlob FS demo (container: {})\n", provider.container_name());

    provider.create_directory(provider.container_name()).await?;

    // Write and read back through the buffered stream
    println!("▶ Writing a/b.dat...");
    let mut stream = provider.open_default("a/b.dat", FileMode::Create, FileAccess::Write).await?;
    stream.write(b"HELLOWORLD").await?;
    stream.close().await?;

    let mut stream = provider.open_default("a/b.dat", FileMode::Open, FileAccess::Read).await?;
    let mut buf = [0u8; 10];
    let n = stream.read(&mut buf).await?;
    println!("  ✓ Read {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));

    // Sparse write past the end
    println!("▶ Writing 1 byte at offset 1000 of sparse.dat...");
    let mut stream = provider
        .open_unbuffered("sparse.dat", OpenOptions::new(FileMode::Create, FileAccess::ReadWrite))
        .await?;
    stream.seek(SeekFrom::Start(1000))?;
    stream.write(&[0xAB]).await?;
    println!("  ✓ Length {}, capacity {}", stream.len(), stream.capacity());

    // Atomic replace
    println!("▶ Replacing final.dat with tmp.dat...");
    let writer = provider.durable_writer();
    writer.write_all_text("final.dat", "previous contents").await?;
    let mut stream = provider.open("tmp.dat", OpenOptions::create()).await?;
    stream.write(b"X").await?;
    stream.close().await?;
    provider.replace("tmp.dat", "final.dat", None).await?;
    println!("  ✓ final.dat = {}", provider.read_all_text("final.dat").await?);

    provider.delete_file("tmp.dat").await?;
    println!("  ✓ tmp.dat exists: {}", provider.file_exists("tmp.dat").await?);

    println!("\n✅ Done");
    Ok(())
}
