//! Speech-to-text via an external CLI tool (§4.2), replacing the teacher's
//! hosted-API `whisper.rs` with a local subprocess: one `ffmpeg` call to
//! produce a 16kHz mono WAV, then one STT binary invocation against it.

use crate::error::BridgeError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Transcribe raw audio bytes (any container `ffmpeg` can decode) to text.
/// `ffmpeg_bin`, `whisper_bin`, and `whisper_model` come from `Config`.
pub async fn transcribe(
    audio: &[u8],
    ffmpeg_bin: &str,
    whisper_bin: &str,
    whisper_model: &str,
) -> Result<String, BridgeError> {
    let tmp = tempfile::tempdir()
        .map_err(|e| BridgeError::Transcription(format!("tempdir: {e}")))?;
    let input_path = tmp.path().join("input.audio");
    let wav_path = tmp.path().join("audio.wav");

    tokio::fs::write(&input_path, audio)
        .await
        .map_err(|e| BridgeError::Transcription(format!("write input: {e}")))?;

    let result = run_with_timeout(async {
        convert_to_wav(ffmpeg_bin, &input_path, &wav_path).await?;
        run_stt(whisper_bin, whisper_model, &wav_path).await
    })
    .await;

    // Best-effort cleanup regardless of outcome — the tempdir's Drop would
    // do this anyway, but make the intent explicit for the wav in particular.
    let _ = tokio::fs::remove_file(&wav_path).await;
    let _ = tokio::fs::remove_file(&input_path).await;

    result
}

async fn run_with_timeout<F>(fut: F) -> Result<String, BridgeError>
where
    F: std::future::Future<Output = Result<String, BridgeError>>,
{
    match tokio::time::timeout(TRANSCRIBE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::Transcription(
            "transcription timed out after 2 minutes".into(),
        )),
    }
}

async fn convert_to_wav(
    ffmpeg_bin: &str,
    input: &std::path::Path,
    output: &std::path::Path,
) -> Result<(), BridgeError> {
    let result = Command::new(ffmpeg_bin)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-ar")
        .arg("16000")
        .arg("-ac")
        .arg("1")
        .arg(output)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BridgeError::Transcription(format!("failed to spawn ffmpeg: {e}")))?;

    if !result.status.success() {
        return Err(BridgeError::Transcription(format!(
            "ffmpeg exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr)
        )));
    }
    Ok(())
}

async fn run_stt(
    whisper_bin: &str,
    whisper_model: &str,
    wav_path: &std::path::Path,
) -> Result<String, BridgeError> {
    let output = Command::new(whisper_bin)
        .arg("-m")
        .arg(whisper_model)
        .arg("-f")
        .arg(wav_path)
        .arg("--no-timestamps")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            BridgeError::Transcription(format!("failed to spawn STT binary: {e}"))
        })?;

    if !output.status.success() {
        return Err(BridgeError::Transcription(format!(
            "STT binary exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_surfaces_transcription_error() {
        let err = transcribe(b"not real audio", "/nonexistent/ffmpeg", "/nonexistent/whisper", "/nonexistent/model.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transcription(_)));
    }
}
