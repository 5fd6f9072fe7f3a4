//! vmboot-pack - prepare direct-boot artifacts from the command line.
//!
//! ```text
//! vmboot-pack initramfs --manifest initramfs.json --output initramfs.cpio
//! vmboot-pack kernel --input vmlinuz --output Image --arm64
//! vmboot-pack kernel --input Image.efi --output Image --scan-stub
//! vmboot-pack list initramfs.cpio
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vmboot::initramfs::NewcReader;
use vmboot::kernel::arm64::{ImageProbe, KernelHeader};
use vmboot::util::write_atomic;
use vmboot::{InitramfsManifest, KernelImage, build_initramfs};

#[derive(Parser, Debug)]
#[command(name = "vmboot-pack", version, about = "Prepare direct kernel boot artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a cpio "newc" initramfs from a JSON manifest
    Initramfs {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Load a kernel image, decompressing gzip input, and write the payload
    Kernel {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Validate and report the ARM64 Image header
        #[arg(long)]
        arm64: bool,
        /// Locate the gzip stream behind an ARM64 decompressor stub and
        /// write the Image it contains (implies --arm64)
        #[arg(long)]
        scan_stub: bool,
    },
    /// List the records of a newc archive
    List { archive: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Initramfs { manifest, output } => build_initramfs_cmd(&manifest, &output),
        Command::Kernel {
            input,
            output,
            arm64,
            scan_stub,
        } => kernel_cmd(&input, &output, arm64, scan_stub),
        Command::List { archive } => list_cmd(&archive),
    }
}

fn build_initramfs_cmd(manifest_path: &Path, output: &Path) -> Result<()> {
    let manifest = InitramfsManifest::from_path(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let files = manifest.resolve(base_dir)?;

    let archive = build_initramfs(&files).context("build initramfs")?;
    write_atomic(output, &archive)
        .with_context(|| format!("write initramfs to {}", output.display()))?;

    tracing::info!(
        files = files.len(),
        bytes = archive.len(),
        output = %output.display(),
        "Initramfs written"
    );
    Ok(())
}

fn kernel_cmd(input: &Path, output: &Path, arm64: bool, scan_stub: bool) -> Result<()> {
    let payload = if scan_stub {
        extract_behind_stub(input)?
    } else {
        let image = KernelImage::open(input)
            .with_context(|| format!("load kernel {}", input.display()))?;
        if arm64 {
            let header = image
                .arm64_header()
                .context("parse arm64 kernel header")?;
            log_arm64_header(&header);
        }
        image.into_payload()
    };

    write_atomic(output, &payload)
        .with_context(|| format!("write kernel to {}", output.display()))?;

    tracing::info!(
        bytes = payload.len(),
        output = %output.display(),
        "Kernel payload written"
    );
    Ok(())
}

fn extract_behind_stub(input: &Path) -> Result<Vec<u8>> {
    let file =
        std::fs::File::open(input).with_context(|| format!("open kernel {}", input.display()))?;
    let size = file.metadata()?.len();
    let probe = ImageProbe::probe(&file, size).context("probe arm64 kernel")?;
    tracing::debug!(
        compressed = probe.needs_decompression,
        compressed_offset = probe.compressed_offset,
        "Probed arm64 kernel"
    );
    log_arm64_header(&probe.header);
    probe
        .extract_image(&file, size)
        .context("extract arm64 kernel")
}

fn log_arm64_header(header: &KernelHeader) {
    tracing::info!(
        text_offset = %format!("{:#x}", header.text_offset),
        image_size = header.image_size,
        "ARM64 kernel header"
    );
}

fn list_cmd(archive_path: &Path) -> Result<()> {
    let bytes = std::fs::read(archive_path)
        .with_context(|| format!("read archive {}", archive_path.display()))?;

    for record in NewcReader::new(&bytes) {
        let record = record.context("decode archive")?;
        println!(
            "{:>6} {:06o} {:>10} {}",
            record.ino,
            record.mode,
            record.data.len(),
            record.name
        );
    }
    Ok(())
}
