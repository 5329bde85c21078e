//! Transcoder command line for one service.
//!
//! Builds the argument vector of a single-program encoder: input, stream
//! mapping, video and audio options, service signalling and output.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use url::Url;

use uplink_model::{
    CodecFamily, NetworkIds, Service, ServiceType, SubtitleMode, VideoCodec,
};

/// EBU R128 loudness target.
const LOUDNORM_FILTER: &str = "loudnorm=I=-23:TP=-2:LRA=11";

/// First elementary stream PID of the first service.
const START_PID: u32 = 0x100;

/// First PMT PID of the first service.
const PMT_START_PID: u32 = 0x1000;

/// Transport stream packets per UDP datagram, times the packet size.
const UDP_PACKET_SIZE: u32 = 1316;

/// Where an encoder reads its media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EncoderInput {
    /// A single file.
    File(PathBuf),

    /// A concatenation list file.
    ConcatList(PathBuf),

    /// A live stream.
    Network(Url),
}

/// Where an encoder writes its transport stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncoderOutput {
    /// Standard output, piped to the multiplexer.
    Pipe,

    /// UDP datagrams to a loopback endpoint.
    Udp(SocketAddr),
}

/// Builder for one service's encoder arguments.
pub(crate) struct EncoderOptionsBuilder<'a> {
    service: &'a Service,
    input: &'a EncoderInput,
    output: EncoderOutput,
    network: &'a NetworkIds,

    /// Position of the service in the session, used for PID allocation.
    index: usize,
}

impl<'a> EncoderOptionsBuilder<'a> {
    pub(crate) fn new(
        service: &'a Service,
        input: &'a EncoderInput,
        output: EncoderOutput,
        network: &'a NetworkIds,
        index: usize,
    ) -> Self {
        Self {
            service,
            input,
            output,
            network,
            index,
        }
    }

    /// Build the argument vector, not including the program.
    pub(crate) fn build(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        push(&mut tokens, &["-hide_banner", "-nostdin", "-y"]);

        self.add_input(&mut tokens);
        self.add_mapping(&mut tokens);
        if self.service.service_type == ServiceType::Tv {
            self.add_video_options(&mut tokens);
        }
        self.add_audio_options(&mut tokens);
        self.add_service_options(&mut tokens);
        self.add_output(&mut tokens);

        tokens
    }

    fn add_input(&self, tokens: &mut Vec<String>) {
        let looping = self.service.looping;
        match self.input {
            EncoderInput::File(path) => {
                tokens.push("-re".to_string());
                if looping {
                    push(tokens, &["-stream_loop", "-1"]);
                }
                tokens.push("-i".to_string());
                tokens.push(path_arg(path));
            }
            EncoderInput::ConcatList(list) => {
                tokens.push("-re".to_string());
                if looping {
                    push(tokens, &["-stream_loop", "-1"]);
                }
                push(tokens, &["-f", "concat", "-safe", "0", "-i"]);
                tokens.push(path_arg(list));
            }
            EncoderInput::Network(url) => {
                tokens.push("-i".to_string());
                tokens.push(url.to_string());
            }
        }
    }

    fn add_mapping(&self, tokens: &mut Vec<String>) {
        let Some(input) = self.service.inputs.first() else {
            return;
        };
        let tv = self.service.service_type == ServiceType::Tv;

        if tv {
            match &input.subtitles {
                SubtitleMode::BurnIn { path, size } => {
                    let mut style = format!("FontSize={}", size.font_size());
                    if SubtitleMode::needs_forced_style(path) {
                        style.push_str(",ForceStyle=1");
                    }
                    tokens.push("-filter_complex".to_string());
                    tokens.push(format!(
                        "[0:v]subtitles=filename='{}':force_style='{}'[vout]",
                        filter_path(path),
                        style
                    ));
                    push(tokens, &["-map", "[vout]"]);
                }
                _ => push(tokens, &["-map", "0:v:0"]),
            }
        } else {
            tokens.push("-vn".to_string());
        }

        for track in &input.audio_tracks {
            tokens.push("-map".to_string());
            tokens.push(format!("0:{}?", track.stream.specifier()));
        }

        if let (true, SubtitleMode::Embedded { stream }) = (tv, &input.subtitles) {
            tokens.push("-map".to_string());
            tokens.push(format!("0:{stream}?"));
            push(tokens, &["-c:s", "copy"]);
        }
    }

    fn add_video_options(&self, tokens: &mut Vec<String>) {
        let video = &self.service.encoding.video;
        let kbps = video.bitrate_kbps;

        tokens.push("-c:v".to_string());
        tokens.push(video.codec.encoder_name().to_string());
        tokens.push("-b:v".to_string());
        tokens.push(format!("{kbps}k"));
        tokens.push("-pix_fmt".to_string());
        tokens.push(video.pixel_format.name().to_string());
        tokens.push("-r".to_string());
        tokens.push(video.format.frame_rate.as_str().to_string());
        tokens.push("-s".to_string());
        tokens.push(video.format.size());
        tokens.push("-aspect".to_string());
        tokens.push(video.aspect.as_str().to_string());
        tokens.push("-maxrate".to_string());
        tokens.push(format!("{kbps}k"));
        tokens.push("-bufsize".to_string());
        tokens.push(format!("{}k", u64::from(kbps) * 2));

        if let Some(order) = video.format.scan.field_order() {
            push(tokens, &["-field_order", order]);
        }

        if has_preset_option(video.codec) {
            push(tokens, &["-preset", video.preset.name()]);
        }

        let b_frames = if video.b_frames { "3" } else { "0" };
        match video.codec.family() {
            CodecFamily::Nvenc => push(tokens, &["-tune", "hq", "-rc", "vbr", "-g", "12"]),
            CodecFamily::Qsv => {
                push(tokens, &["-tune", "hq", "-rc", "vbr", "-g", "12", "-bf", b_frames])
            }
            CodecFamily::Software => push(tokens, &["-g", "50", "-bf", b_frames]),
        }
    }

    fn add_audio_options(&self, tokens: &mut Vec<String>) {
        let audio = &self.service.encoding.audio;

        tokens.push("-c:a".to_string());
        tokens.push(audio.codec.encoder_name().to_string());
        tokens.push("-b:a".to_string());
        tokens.push(format!("{}k", audio.bitrate_kbps));
        tokens.push("-ar".to_string());
        tokens.push(audio.sample_rate.to_string());
        push(tokens, &["-ac", "2"]);
        if audio.loudnorm {
            push(tokens, &["-af", LOUDNORM_FILTER]);
        }

        let tracks = self
            .service
            .inputs
            .first()
            .map(|input| input.audio_tracks.as_slice())
            .unwrap_or_default();
        for (i, track) in tracks.iter().enumerate() {
            tokens.push(format!("-metadata:s:a:{i}"));
            tokens.push(format!("language={}", track.language));
        }
    }

    fn add_service_options(&self, tokens: &mut Vec<String>) {
        let index = self.index as u32;
        let service_type = match self.service.service_type {
            ServiceType::Tv => "digital_tv",
            ServiceType::Radio => "digital_radio",
        };

        tokens.push("-mpegts_service_id".to_string());
        tokens.push(self.service.id.0.to_string());
        tokens.push("-mpegts_pmt_start_pid".to_string());
        tokens.push((PMT_START_PID + index).to_string());
        tokens.push("-mpegts_start_pid".to_string());
        tokens.push((START_PID + index * 0x10).to_string());
        tokens.push("-mpegts_transport_stream_id".to_string());
        tokens.push(self.network.transport_stream_id.to_string());
        tokens.push("-mpegts_original_network_id".to_string());
        tokens.push(self.network.original_network_id.to_string());
        push(tokens, &["-mpegts_service_type", service_type]);

        tokens.push("-metadata".to_string());
        tokens.push(format!("service_name={}", self.service.name));
        tokens.push("-metadata".to_string());
        tokens.push(format!("service_provider={}", self.service.provider));
    }

    fn add_output(&self, tokens: &mut Vec<String>) {
        push(tokens, &["-f", "mpegts"]);
        match self.output {
            EncoderOutput::Pipe => tokens.push("pipe:1".to_string()),
            EncoderOutput::Udp(endpoint) => {
                tokens.push(format!("udp://{endpoint}?pkt_size={UDP_PACKET_SIZE}"))
            }
        }
    }
}

fn push(tokens: &mut Vec<String>, args: &[&str]) {
    tokens.extend(args.iter().map(|a| a.to_string()));
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Path inside a filter graph: forward slashes, escaped colons and quotes.
fn filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''")
}

/// Encoders that accept `-preset`.
fn has_preset_option(codec: VideoCodec) -> bool {
    !matches!(
        codec,
        VideoCodec::Mpeg2video | VideoCodec::Mpeg4 | VideoCodec::LibvpxVp9
    )
}
