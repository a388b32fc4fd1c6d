//! イメージの取得とビルド

// Bollard 0.19 の非推奨APIを使用
#![allow(deprecated)]

use crate::context::ContextBuilder;
use crate::error::{ContainerError, Result};
use bollard::Docker;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use tierflow_pipeline::BuildRequest;

/// Docker config.json からレジストリの認証情報を取得
pub fn get_docker_credentials(registry: &str) -> Option<bollard::auth::DockerCredentials> {
    let home = std::env::var("HOME").ok()?;
    let config_path = format!("{}/.docker/config.json", home);
    let config_content = std::fs::read_to_string(&config_path).ok()?;
    let config: serde_json::Value = serde_json::from_str(&config_content).ok()?;

    let auth_b64 = config
        .get("auths")?
        .as_object()?
        .get(registry)?
        .get("auth")?
        .as_str()?;

    // username:password 形式
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .ok()?;
    let auth_str = String::from_utf8(decoded).ok()?;
    let (username, password) = auth_str.split_once(':')?;

    Some(bollard::auth::DockerCredentials {
        username: Some(username.to_string()),
        password: Some(password.to_string()),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    })
}

/// イメージ名からレジストリを抽出
///
/// 最初のセグメントが `.` か `:` を含む場合のみレジストリとみなす
/// （例: ghcr.io, localhost:5000）
pub fn extract_registry(image: &str) -> Option<&str> {
    let (first, _) = image.split_once('/')?;
    if first.contains('.') || first.contains(':') {
        Some(first)
    } else {
        None
    }
}

/// イメージ名とタグを分離
///
/// 例: "mongo:6" -> ("mongo", "6"), "localhost:5000/shop-api" -> ("localhost:5000/shop-api", "latest")
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].rfind(':') {
        Some(pos) => {
            let split = last_segment_start + pos;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

/// レジストリからイメージをpull
pub async fn pull_image(docker: &Docker, image: &str) -> Result<()> {
    let (image_name, tag) = parse_image_tag(image);
    let credentials = extract_registry(image).and_then(get_docker_credentials);

    let options = CreateImageOptions {
        from_image: image_name,
        tag,
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, credentials);
    while let Some(info) = stream.next().await {
        match info {
            Ok(bollard::models::CreateImageInfo {
                status: Some(status),
                ..
            }) => {
                tracing::debug!(image, "{}", status);
            }
            Ok(_) => {}
            Err(e) => {
                return Err(ContainerError::PullFailed {
                    image: image.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::info!("Pulled image: {}", image);
    Ok(())
}

/// ソースツリーからイメージをビルド
pub async fn build_image(docker: &Docker, request: &BuildRequest) -> Result<()> {
    let context_data =
        ContextBuilder::create_context(&request.context, request.dockerfile.as_deref())?;
    tracing::info!("Building image: {}", request.tag);

    let build_args: HashMap<&str, &str> = request
        .args
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let options = BuildImageOptions {
        dockerfile: "Dockerfile",
        t: request.tag.as_str(),
        buildargs: build_args,
        rm: true,
        forcerm: true,
        ..Default::default()
    };

    use bytes::Bytes;
    use http_body_util::{Either, Full};
    let body = Full::new(Bytes::from(context_data));
    let mut stream = docker.build_image(options, None, Some(Either::Left(body)));

    while let Some(msg) = stream.next().await {
        let output = msg.map_err(|e| ContainerError::BuildFailed {
            tag: request.tag.clone(),
            message: e.to_string(),
        })?;
        handle_build_output(&request.tag, output)?;
    }

    tracing::info!("Successfully built: {}", request.tag);
    Ok(())
}

fn handle_build_output(tag: &str, output: bollard::models::BuildInfo) -> Result<()> {
    if let Some(stream) = output.stream {
        let line = stream.trim_end();
        if !line.is_empty() {
            tracing::debug!(tag, "{}", line);
        }
    }

    if let Some(error_detail) = output.error_detail {
        let message = error_detail
            .message
            .or(output.error)
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(ContainerError::BuildFailed {
            tag: tag.to_string(),
            message,
        });
    }
    if let Some(error) = output.error {
        return Err(ContainerError::BuildFailed {
            tag: tag.to_string(),
            message: error,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_tag() {
        assert_eq!(parse_image_tag("mongo:6"), ("mongo", "6"));
        assert_eq!(parse_image_tag("node"), ("node", "latest"));
        assert_eq!(
            parse_image_tag("localhost:5000/shop-api"),
            ("localhost:5000/shop-api", "latest")
        );
        assert_eq!(
            parse_image_tag("ghcr.io/example/shop-web:1.2"),
            ("ghcr.io/example/shop-web", "1.2")
        );
    }

    #[test]
    fn test_extract_registry() {
        assert_eq!(extract_registry("ghcr.io/example/api:1"), Some("ghcr.io"));
        assert_eq!(extract_registry("localhost:5000/api"), Some("localhost:5000"));
        assert_eq!(extract_registry("library/mongo:6"), None);
        assert_eq!(extract_registry("mongo:6"), None);
    }

    #[test]
    fn test_build_error_detail() {
        let output = bollard::models::BuildInfo {
            error_detail: Some(bollard::models::ErrorDetail {
                message: Some("npm ERR! missing script: build".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = handle_build_output("shop-web:latest", output).unwrap_err();
        assert!(err.to_string().contains("npm ERR! missing script: build"));
    }
}
