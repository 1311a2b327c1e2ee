use crate::utils::error::DetectorError;
use crate::Result;
use std::fs;
use std::path::Path;

/// Files copied by [`organize_speaker`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizeSummary {
    pub real_videos: usize,
    pub fake_videos: usize,
}

/// Sort a DeepfakeTIMIT-style tree into real/fake folders for one speaker.
///
/// Real: every `.avi` in `<base_dir>/<speaker>/`.
/// Fake: every `*video-<speaker>.avi` found in the other speakers' folders,
/// i.e. face swaps made to look like `speaker`.
pub fn organize_speaker(
    base_dir: &Path,
    speaker: &str,
    real_out: &Path,
    fake_out: &Path,
) -> Result<OrganizeSummary> {
    let speaker_dir = base_dir.join(speaker);
    if !speaker_dir.is_dir() {
        return Err(DetectorError::InvalidInput(format!(
            "Speaker directory not found: {}",
            speaker_dir.display()
        )));
    }

    fs::create_dir_all(real_out)?;
    fs::create_dir_all(fake_out)?;

    let mut summary = OrganizeSummary::default();

    for entry in fs::read_dir(&speaker_dir)? {
        let path = entry?.path();
        if path.is_file() && has_avi_extension(&path) {
            copy_into(&path, real_out)?;
            summary.real_videos += 1;
        }
    }
    tracing::info!("Found {} real videos for {}", summary.real_videos, speaker);

    let fake_suffix = format!("video-{}.avi", speaker).to_lowercase();

    for entry in fs::read_dir(base_dir)? {
        let other_dir = entry?.path();
        if !other_dir.is_dir() || other_dir.file_name().is_some_and(|n| n == speaker) {
            continue;
        }

        for video in fs::read_dir(&other_dir)? {
            let path = video?.path();
            let matches = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .is_some_and(|n| n.ends_with(&fake_suffix));
            if path.is_file() && matches {
                copy_into(&path, fake_out)?;
                summary.fake_videos += 1;
            }
        }
    }
    tracing::info!("Organized {} fake videos for {}", summary.fake_videos, speaker);

    Ok(summary)
}

fn has_avi_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("avi"))
}

fn copy_into(file: &Path, dir: &Path) -> Result<()> {
    let name = file.file_name().ok_or_else(|| {
        DetectorError::InvalidInput(format!("Not a file path: {}", file.display()))
    })?;
    fs::copy(file, dir.join(name))?;
    Ok(())
}
