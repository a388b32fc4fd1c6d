use crate::error::{ContainerError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::{Path, PathBuf};
use tar::Builder;

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// `dockerfile` はコンテキストからの相対パス。未指定なら `Dockerfile`。
    /// アーカイブ内では常に `Dockerfile` として配置する。
    pub fn create_context(context_path: &Path, dockerfile: Option<&Path>) -> Result<Vec<u8>> {
        if !context_path.is_dir() {
            return Err(ContainerError::ContextNotFound(context_path.to_path_buf()));
        }
        let dockerfile_path = Self::resolve_dockerfile(context_path, dockerfile);
        if !dockerfile_path.is_file() {
            return Err(ContainerError::DockerfileNotFound(dockerfile_path));
        }

        tracing::debug!("Creating build context from: {}", context_path.display());

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            tar.append_dir_all(".", context_path)?;

            let dockerfile_content = std::fs::read(&dockerfile_path)?;
            let mut header = tar::Header::new_gnu();
            header.set_path("Dockerfile")?;
            header.set_size(dockerfile_content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, &dockerfile_content[..])?;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());
        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    fn resolve_dockerfile(context_path: &Path, dockerfile: Option<&Path>) -> PathBuf {
        match dockerfile {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => context_path.join(path),
            None => context_path.join("Dockerfile"),
        }
    }

    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024;

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "ビルドコンテキストが大きすぎます（{}MB）。.dockerignoreで不要なファイルを除外してください",
                size / 1024 / 1024
            );
        }
    }
}
