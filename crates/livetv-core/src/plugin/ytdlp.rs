use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::youtube::is_live;
use super::{Capability, ForgedPlaylist, Plugin, PluginContext};
use crate::error::ResolveError;
use crate::fetch::RequestOptions;
use crate::model::{Channel, ExtraState, LiveInfo};

const OAUTH_ARGS: &[&str] = &[
    "--no-warnings",
    "--extractor-args",
    "youtube:skip=dash",
    "-f",
    "bestvideo*+bestaudio/best",
    "-g",
    "--username",
    "oauth2",
    "--password",
    "",
];

const FORGED_MASTER: &str = r#"#EXTM3U
#EXT-X-VERSION:4
#EXT-X-INDEPENDENT-SEGMENTS
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="audio_mp4a.40.2_48000",NAME="a48000_zho",DEFAULT=YES,AUTOSELECT=YES,URI="{AUDIO}"
#EXT-X-STREAM-INF:PROGRAM-ID=0,BANDWIDTH=2152910,AUDIO="audio_mp4a.40.2_48000"
{VIDEO}
"#;

/// Captured result of one extractor run.
#[derive(Debug)]
struct Extraction {
    urls: Vec<String>,
}

/// Runs the extractor and keeps the `http` lines of its combined output.
async fn extract(
    ctx: &PluginContext<'_>,
    args: Vec<String>,
) -> Result<Extraction, ResolveError> {
    let tool = ctx.config.ytdl_cmd.clone();
    debug!(tool = %tool, ?args, "Running extractor");
    let child = Command::new(&tool)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(ctx.config.request_timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ResolveError::ExternalTool {
                tool,
                reason: e.to_string(),
                output: String::new(),
            })
        }
        Err(_) => {
            return Err(ResolveError::ExternalTool {
                tool,
                reason: format!("timed out after {:?}", ctx.config.request_timeout),
                output: String::new(),
            })
        }
    };

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let urls: Vec<String> = combined
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("http"))
        .map(str::to_string)
        .collect();
    let ends_with_manifest = urls.last().is_some_and(|url| url.ends_with("m3u8"));
    if !output.status.success() && !ends_with_manifest {
        warn!(tool = %tool, status = %output.status, "Extractor failed");
        return Err(ResolveError::ExternalTool {
            tool,
            reason: output.status.to_string(),
            output: combined,
        });
    }
    Ok(Extraction { urls })
}

fn with_proxy(mut args: Vec<String>, channel: &Channel) -> Vec<String> {
    if let Some(proxy) = channel.proxy_url.as_deref().filter(|p| !p.is_empty()) {
        args.insert(0, proxy.to_string());
        args.insert(0, "--proxy".to_string());
    }
    args
}

/// Asks an installed `yt-dlp` for the stream URL of any page it supports.
#[derive(Debug, Clone, Copy, Default)]
pub struct YtDlpPlugin;

impl YtDlpPlugin {
    fn args(template: &str, url: &str) -> Vec<String> {
        template
            .split_whitespace()
            .map(|arg| arg.replace("{url}", url))
            .collect()
    }
}

#[async_trait]
impl Plugin for YtDlpPlugin {
    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let options = RequestOptions::new().with_proxy(channel.proxy_url.as_deref());
        if let Some(last_url) = previous.and_then(|p| p.extra.last_url.as_deref()) {
            if is_live(ctx, last_url, &options).await {
                info!(source_url = %channel.url, last_url, "Reused last stream url");
                return Ok(LiveInfo::new(last_url).with_extra(ExtraState {
                    last_url: Some(last_url.to_string()),
                    ..ExtraState::default()
                }));
            }
        }

        let args = with_proxy(Self::args(&ctx.config.ytdl_args, channel.url.trim()), channel);
        let extraction = extract(ctx, args).await?;
        let live_url = extraction
            .urls
            .last()
            .cloned()
            .ok_or_else(|| ResolveError::NoLiveFeed(channel.url.clone()))?;
        if !is_live(ctx, &live_url, &options).await {
            return Err(ResolveError::NoLiveFeed(format!("{} is no longer streaming", channel.url)));
        }

        Ok(LiveInfo::new(live_url.clone()).with_extra(ExtraState {
            last_url: Some(live_url),
            ..ExtraState::default()
        }))
    }
}

/// `yt-dlp` with OAuth login, returning separate video and audio streams
/// joined by a forged master playlist.
#[derive(Debug, Clone, Copy, Default)]
pub struct YtDlpOAuthPlugin;

#[async_trait]
impl Plugin for YtDlpOAuthPlugin {
    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ForgePlaylist]
    }

    async fn resolve(
        &self,
        ctx: &PluginContext<'_>,
        channel: &Channel,
        previous: Option<&LiveInfo>,
    ) -> Result<LiveInfo, ResolveError> {
        let options = RequestOptions::new().with_proxy(channel.proxy_url.as_deref());
        if let Some(previous) = previous.filter(|p| p.extra.audio_url.is_some()) {
            if let Some(last_url) = previous.extra.last_url.as_deref() {
                if is_live(ctx, last_url, &options).await {
                    info!(source_url = %channel.url, last_url, "Reused last stream urls");
                    return Ok(LiveInfo::new(last_url).with_extra(ExtraState {
                        last_url: Some(last_url.to_string()),
                        video_url: Some(last_url.to_string()),
                        audio_url: previous.extra.audio_url.clone(),
                        ..ExtraState::default()
                    }));
                }
            }
        }

        let mut args: Vec<String> = OAUTH_ARGS.iter().map(|a| a.to_string()).collect();
        args.push(channel.url.trim().to_string());
        let extraction = extract(ctx, with_proxy(args, channel)).await?;

        let [video, audio] = <[String; 2]>::try_from(extraction.urls).map_err(|urls| {
            ResolveError::ExternalTool {
                tool: ctx.config.ytdl_cmd.clone(),
                reason: format!("expected a video and an audio url, got {}", urls.len()),
                output: urls.join("\n"),
            }
        })?;
        if !is_live(ctx, &video, &options).await {
            return Err(ResolveError::NoLiveFeed(format!("{} is no longer streaming", channel.url)));
        }

        Ok(LiveInfo::new(video.clone()).with_extra(ExtraState {
            last_url: Some(video.clone()),
            video_url: Some(video),
            audio_url: Some(audio),
            ..ExtraState::default()
        }))
    }

    fn forge_playlist(&self, info: &LiveInfo) -> Result<ForgedPlaylist, ResolveError> {
        let (Some(video), Some(audio)) = (&info.extra.video_url, &info.extra.audio_url) else {
            return Err(ResolveError::NoLiveFeed(info.live_url.clone()));
        };
        Ok(ForgedPlaylist {
            base_url: video.clone(),
            content: FORGED_MASTER.replace("{AUDIO}", audio).replace("{VIDEO}", video),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::fetch::HttpFetcher;
    use crate::model::ChannelId;
    use crate::plugin::PluginRegistry;

    #[test]
    fn url_placeholder_is_substituted() {
        let args = YtDlpPlugin::args("-f b -g {url}", "https://v.example/w");
        assert_eq!(args, vec!["-f", "b", "-g", "https://v.example/w"]);
    }

    #[test]
    fn proxy_is_passed_first() {
        let channel = Channel::new(ChannelId::root(1), "c", "https://v").with_proxy_url("socks5://p:1");
        let args = with_proxy(vec!["-g".to_string()], &channel);
        assert_eq!(args, vec!["--proxy", "socks5://p:1", "-g"]);
    }

    #[test]
    fn forged_master_references_both_streams() {
        let info = LiveInfo::new("https://v/video.m3u8").with_extra(ExtraState {
            video_url: Some("https://v/video.m3u8".into()),
            audio_url: Some("https://a/audio.m3u8".into()),
            ..ExtraState::default()
        });
        let forged = YtDlpOAuthPlugin.forge_playlist(&info).unwrap();
        assert_eq!(forged.base_url, "https://v/video.m3u8");
        assert!(forged.content.contains(r#"URI="https://a/audio.m3u8""#));
        assert!(forged.content.ends_with("https://v/video.m3u8\n"));
        assert!(m3u8_rs::parse_master_playlist_res(forged.content.as_bytes()).is_ok());
    }

    #[test]
    fn forging_needs_both_streams() {
        let info = LiveInfo::new("https://v/video.m3u8");
        assert!(YtDlpOAuthPlugin.forge_playlist(&info).is_err());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        async fn run(
            plugin: &dyn Plugin,
            config: RelayConfig,
            url: String,
            previous: Option<&LiveInfo>,
        ) -> Result<LiveInfo, ResolveError> {
            let fetcher = HttpFetcher::new(&config);
            let registry = PluginRegistry::new();
            let ctx = PluginContext {
                fetcher: &fetcher,
                config: &config,
                registry: &registry,
            };
            plugin
                .resolve(&ctx, &Channel::new(ChannelId::root(9), "ytdl", url), previous)
                .await
        }

        async fn live_server(body: &str) -> MockServer {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/live.m3u8"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("Content-Type", "application/vnd.apple.mpegurl")
                        .set_body_string(body),
                )
                .mount(&server)
                .await;
            server
        }

        const LIVE: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2,\n1.ts\n";

        #[tokio::test]
        async fn printed_url_becomes_live_url() {
            let server = live_server(LIVE).await;
            let url = format!("{}/live.m3u8", server.uri());
            let config = RelayConfig::default().with_ytdl("echo", "{url}");
            let info = run(&YtDlpPlugin, config, url.clone(), None).await.unwrap();
            assert_eq!(info.live_url, url);
            assert_eq!(info.extra.last_url.as_deref(), Some(url.as_str()));
        }

        #[tokio::test]
        async fn ended_stream_is_not_live() {
            let server = live_server("#EXTM3U\n#EXTINF:2,\n1.ts\n#EXT-X-ENDLIST\n").await;
            let config = RelayConfig::default().with_ytdl("echo", "{url}");
            let err = run(&YtDlpPlugin, config, format!("{}/live.m3u8", server.uri()), None)
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::NoLiveFeed(_)));
        }

        #[tokio::test]
        async fn live_last_url_skips_the_extractor() {
            let server = live_server(LIVE).await;
            let last = format!("{}/live.m3u8", server.uri());
            let previous = LiveInfo::new(last.clone()).with_extra(ExtraState {
                last_url: Some(last.clone()),
                ..ExtraState::default()
            });
            let config = RelayConfig::default().with_ytdl("false", "{url}");
            let info = run(&YtDlpPlugin, config, "https://page".into(), Some(&previous))
                .await
                .unwrap();
            assert_eq!(info.live_url, last);
        }

        #[tokio::test]
        async fn failing_tool_is_reported() {
            let config = RelayConfig::default().with_ytdl("false", "{url}");
            let err = run(&YtDlpPlugin, config, "https://page".into(), None).await.unwrap_err();
            assert!(matches!(err, ResolveError::ExternalTool { ref tool, .. } if tool == "false"));
        }

        #[tokio::test]
        async fn missing_tool_is_reported() {
            let config = RelayConfig::default().with_ytdl("/nonexistent/yt-dlp", "{url}");
            let err = run(&YtDlpPlugin, config, "https://page".into(), None).await.unwrap_err();
            assert!(matches!(err, ResolveError::ExternalTool { .. }));
        }

        #[tokio::test]
        async fn oauth_captures_video_and_audio() {
            use std::os::unix::fs::PermissionsExt;

            let server = live_server(LIVE).await;
            let video = format!("{}/live.m3u8", server.uri());
            let script = std::env::temp_dir().join(format!("ytdlp-oauth-{}.sh", std::process::id()));
            std::fs::write(
                &script,
                format!("#!/bin/sh\necho {}\necho https://a.example/audio.m3u8\n", video),
            )
            .unwrap();
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

            let config = RelayConfig::default().with_ytdl(script.to_string_lossy(), "");
            let info = run(&YtDlpOAuthPlugin, config, "https://page".into(), None).await.unwrap();
            std::fs::remove_file(&script).ok();

            assert_eq!(info.live_url, video);
            assert_eq!(info.extra.last_url.as_deref(), Some(video.as_str()));
            assert_eq!(info.extra.audio_url.as_deref(), Some("https://a.example/audio.m3u8"));
        }

        #[tokio::test]
        async fn oauth_reuses_live_last_url() {
            let server = live_server(LIVE).await;
            let last = format!("{}/live.m3u8", server.uri());
            let previous = LiveInfo::new(last.clone()).with_extra(ExtraState {
                last_url: Some(last.clone()),
                video_url: Some(last.clone()),
                audio_url: Some("https://a.example/audio.m3u8".into()),
                ..ExtraState::default()
            });
            let config = RelayConfig::default().with_ytdl("false", "");
            let info = run(&YtDlpOAuthPlugin, config, "https://page".into(), Some(&previous))
                .await
                .unwrap();
            assert_eq!(info.live_url, last);
            assert_eq!(info.extra.last_url.as_deref(), Some(last.as_str()));
            assert_eq!(info.extra.audio_url.as_deref(), Some("https://a.example/audio.m3u8"));
            assert!(YtDlpOAuthPlugin.forge_playlist(&info).is_ok());
        }

        #[tokio::test]
        async fn oauth_ended_last_url_runs_the_extractor() {
            let server = live_server("#EXTM3U\n#EXTINF:2,\n1.ts\n#EXT-X-ENDLIST\n").await;
            let last = format!("{}/live.m3u8", server.uri());
            let previous = LiveInfo::new(last.clone()).with_extra(ExtraState {
                last_url: Some(last),
                audio_url: Some("https://a.example/audio.m3u8".into()),
                ..ExtraState::default()
            });
            let config = RelayConfig::default().with_ytdl("false", "");
            let err = run(&YtDlpOAuthPlugin, config, "https://page".into(), Some(&previous))
                .await
                .unwrap_err();
            assert!(matches!(err, ResolveError::ExternalTool { ref tool, .. } if tool == "false"));
        }

        #[tokio::test]
        async fn oauth_needs_two_urls() {
            let config = RelayConfig::default().with_ytdl("echo", "");
            let err = run(&YtDlpOAuthPlugin, config, "https://page".into(), None).await.unwrap_err();
            assert!(matches!(err, ResolveError::ExternalTool { .. }));
        }
    }
}
