use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::driver::ServerInfo;

/// 顺序追加的 SQL 脚本输出流
///
/// 每个片段写入后立即 flush，整个脚本不会驻留内存。
pub struct ScriptWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> ScriptWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    /// 文件头注释与关闭外键检查
    pub fn write_header(
        &mut self,
        endpoint: &str,
        server: &ServerInfo,
    ) -> io::Result<()> {
        let header = format!(
            "/*\n * Source: {}\n * Database product & version: {} {}\n * Generated at: {}\n */\nSET FOREIGN_KEY_CHECKS=0;\n",
            endpoint,
            server.product,
            server.version,
            Utc::now().to_rfc3339()
        );
        self.write_section(&header)
    }

    pub fn write_section(
        &mut self,
        text: &str,
    ) -> io::Result<()> {
        self.inner.write_all(text.as_bytes())?;
        self.inner.flush()?;
        self.bytes += text.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// 恢复外键检查并交回底层输出
    pub fn finish(mut self) -> io::Result<W> {
        self.write_section("\nSET FOREIGN_KEY_CHECKS=1;\n")?;
        Ok(self.inner)
    }
}

/// 磁盘上的脚本文件；未调用 finish 就被 drop 时删除文件，避免残缺脚本被打包
pub struct ScriptFile {
    path: PathBuf,
    writer: Option<ScriptWriter<BufWriter<File>>>,
}

impl ScriptFile {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        tracing::info!("脚本文件创建成功: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(ScriptWriter::new(BufWriter::new(file))),
        })
    }

    pub fn writer(&mut self) -> io::Result<&mut ScriptWriter<BufWriter<File>>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other("脚本已关闭"))
    }

    /// 写入结尾并落盘，返回脚本路径
    pub fn finish(mut self) -> io::Result<PathBuf> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other("脚本已关闭"))?;

        let result = writer
            .finish()
            .and_then(|buffered| buffered.into_inner().map_err(|e| e.into_error()))
            .and_then(|file| file.sync_all());

        if let Err(e) = result {
            discard(&self.path);
            return Err(e);
        }
        Ok(self.path.clone())
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            discard(&self.path);
        }
    }
}

fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::warn!("已删除未完成的脚本: {}", path.display()),
        Err(e) => tracing::error!("删除未完成的脚本失败 {}: {}", path.display(), e),
    }
}
