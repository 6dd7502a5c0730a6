use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    bytes::Bytes,
    lembar_config::LembarConfig,
    lembar_media::DocumentAssembler,
};

/// Assemble `inputs` into a single PDF at `output`, one page per image.
pub async fn assemble_files(
    config: &LembarConfig,
    inputs: &[PathBuf],
    output: &Path,
) -> anyhow::Result<()> {
    let mut images = Vec::with_capacity(inputs.len());
    for input in inputs {
        let data = tokio::fs::read(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        images.push(Bytes::from(data));
    }

    let assembler = DocumentAssembler::new(config.document.decoders.iter().copied());
    let pdf = tokio::task::spawn_blocking(move || assembler.assemble(&images))
        .await?
        .with_context(|| format!("failed to assemble {} image(s)", inputs.len()))?;

    tokio::fs::write(output, &pdf)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Wrote {} ({} page(s), {} bytes)",
        output.display(),
        inputs.len(),
        pdf.len()
    );
    Ok(())
}
