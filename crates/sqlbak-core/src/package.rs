//! 将完成的脚本压缩为单文件 zip
//!
//! 先写入同目录的 *.zip.part，校验通过后改名为 *.zip，最后删除脚本。
//! 任何一步失败都会删除 .part 文件，脚本保持原样。

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::{ArchiveResult, ArchiveStatus};

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("读写文件失败: {0}")]
    Io(#[from] io::Error),
    #[error("生成压缩包失败: {0}")]
    Archive(#[from] ZipError),
    #[error("压缩包校验失败: {0}")]
    Verify(String),
    /// 压缩包已生成，仅删除脚本失败
    #[error("删除原始脚本失败: {0}")]
    Cleanup(#[source] io::Error),
}

/// 压缩脚本，成功后删除脚本
pub fn package(script: &Path) -> ArchiveResult {
    let archive_path = script.with_extension("zip");

    if is_archive(script) {
        tracing::info!("已是压缩包，跳过: {}", script.display());
        return ArchiveResult {
            archive_path: script.to_path_buf(),
            status: ArchiveStatus::Skipped,
            source_retained: true,
            error: None,
        };
    }

    if !script.is_file() {
        tracing::warn!("脚本不存在，跳过压缩: {}", script.display());
        return ArchiveResult {
            archive_path,
            status: ArchiveStatus::NotFound,
            source_retained: false,
            error: None,
        };
    }

    let part_path = part_path(&archive_path);
    if let Err(e) = build_archive(script, &part_path, &archive_path) {
        tracing::error!("压缩脚本失败 {}: {}", script.display(), e);
        if part_path.exists() {
            if let Err(e) = fs::remove_file(&part_path) {
                tracing::warn!("删除临时压缩包失败 {}: {}", part_path.display(), e);
            }
        }
        return ArchiveResult {
            archive_path,
            status: ArchiveStatus::Failed,
            source_retained: true,
            error: Some(e),
        };
    }
    tracing::info!("压缩包已生成: {}", archive_path.display());

    match fs::remove_file(script) {
        Ok(()) => ArchiveResult {
            archive_path,
            status: ArchiveStatus::Created,
            source_retained: false,
            error: None,
        },
        Err(e) => {
            tracing::warn!("删除原始脚本失败 {}: {}", script.display(), e);
            ArchiveResult {
                archive_path,
                status: ArchiveStatus::Created,
                source_retained: true,
                error: Some(PackageError::Cleanup(e)),
            }
        }
    }
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

fn part_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn entry_name(script: &Path) -> Result<String, PackageError> {
    script
        .file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
        .ok_or_else(|| PackageError::Verify(format!("无法识别的脚本文件名: {}", script.display())))
}

fn build_archive(
    script: &Path,
    part: &Path,
    archive: &Path,
) -> Result<(), PackageError> {
    write_verified(script, part)?;
    fs::rename(part, archive)?;
    Ok(())
}

fn write_verified(
    script: &Path,
    target: &Path,
) -> Result<(), PackageError> {
    let name = entry_name(script)?;
    let expected = fs::metadata(script)?.len();

    // 写入
    let mut zip = ZipWriter::new(BufWriter::new(File::create(target)?));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(expected >= u32::MAX as u64);
    zip.start_file(name.as_str(), options)?;
    let mut reader = BufReader::new(File::open(script)?);
    let copied = io::copy(&mut reader, &mut zip)?;
    let buffered = zip.finish()?;
    buffered.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    if copied != expected {
        return Err(PackageError::Verify(format!(
            "写入 {} 字节，脚本大小 {} 字节",
            copied, expected
        )));
    }

    // 重新打开校验
    let mut archive = ZipArchive::new(File::open(target)?)?;
    if archive.len() != 1 {
        return Err(PackageError::Verify(format!("条目数量为 {}", archive.len())));
    }
    let entry = archive.by_index(0)?;
    if entry.name() != name {
        return Err(PackageError::Verify(format!("条目名称不匹配: {}", entry.name())));
    }
    if entry.size() != expected {
        return Err(PackageError::Verify(format!(
            "条目大小 {} 与脚本大小 {} 不一致",
            entry.size(),
            expected
        )));
    }

    Ok(())
}
