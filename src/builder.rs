//! Builder Module
//!
//! Fluent Builder APIを提供し、`CsvConverter`インスタンスを段階的に構築する。
//! 構築した`CsvConverter`から`WorkbookWriter`を生成し、CSVソースを1つずつ
//! ワークシートとして追加していきます。

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use chrono::Utc;
use tokio::io::AsyncRead;
use zip::ZipWriter;

use crate::api::Staging;
use crate::error::CsvBookError;
use crate::security::WorkbookLimits;
use crate::sheet_name::SheetNamer;
use crate::types::{SheetEntry, SourceRecord};
use crate::writer::{write_package_parts, write_worksheet, worksheet_path};

/// 変換処理の設定を保持する内部構造体
#[derive(Debug, Clone)]
pub(crate) struct WorkbookConfig {
    /// CSVの区切り文字
    pub delimiter: u8,

    /// ステージング方式
    pub staging: Staging,

    /// 行数・列数・セル文字数の上限
    pub limits: WorkbookLimits,

    /// シート名の導出時に拡張子を取り除くか
    pub strip_extension: bool,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            staging: Staging::Memory,
            limits: WorkbookLimits::default(),
            strip_extension: true,
        }
    }
}

/// Fluent Builder APIを提供する構造体
///
/// すべての設定項目にデフォルト値が設定されており、必要な設定のみを
/// オーバーライドできます。
///
/// # 使用例
///
/// ```rust,no_run
/// use csvbook::{Staging, WorkbookBuilder};
///
/// # fn main() -> Result<(), csvbook::CsvBookError> {
/// let converter = WorkbookBuilder::new()
///     .with_delimiter(b';')
///     .with_staging(Staging::TempFile)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct WorkbookBuilder {
    /// 内部設定（構築中）
    config: WorkbookConfig,
}

impl WorkbookBuilder {
    /// デフォルト設定を持つビルダーインスタンスを生成する
    ///
    /// # デフォルト設定
    ///
    /// - 区切り文字: `,`
    /// - ステージング: メモリ
    /// - 上限: Excelの上限値
    /// - シート名: 拡張子を取り除く
    pub fn new() -> Self {
        Self::default()
    }

    /// CSVの区切り文字を指定する
    ///
    /// ASCII文字のみ指定できます。`"`、CR、LFは`build()`時にエラーとなります。
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    /// ステージング方式を指定する
    pub fn with_staging(mut self, staging: Staging) -> Self {
        self.config.staging = staging;
        self
    }

    /// 行数・列数・セル文字数の上限を指定する
    ///
    /// # 使用例
    ///
    /// ```rust,no_run
    /// use csvbook::{WorkbookBuilder, WorkbookLimits};
    ///
    /// let builder = WorkbookBuilder::new().with_limits(WorkbookLimits {
    ///     max_rows: 10_000,
    ///     ..WorkbookLimits::default()
    /// });
    /// ```
    pub fn with_limits(mut self, limits: WorkbookLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// シート名の導出時に拡張子を取り除くかを指定する
    ///
    /// * `true`: `jan.csv` → `jan`（デフォルト）
    /// * `false`: `jan.csv` → `jan.csv`
    pub fn with_strip_extension(mut self, strip: bool) -> Self {
        self.config.strip_extension = strip;
        self
    }

    /// 設定を検証し、`CsvConverter`インスタンスを生成する
    ///
    /// # 発生し得るエラー
    ///
    /// * `CsvBookError::Config(String)`: 設定の検証に失敗した場合
    ///   * 区切り文字がASCII以外、または`"`・CR・LF
    ///   * 上限値が0、またはExcelの上限を超える
    pub fn build(self) -> Result<CsvConverter, CsvBookError> {
        // 1. 区切り文字の検証
        let delimiter = self.config.delimiter;
        if !delimiter.is_ascii() || matches!(delimiter, b'"' | b'\r' | b'\n') {
            return Err(CsvBookError::Config(format!(
                "Invalid delimiter: 0x{:02X}",
                delimiter
            )));
        }

        // 2. 上限値の検証
        self.config.limits.validate().map_err(CsvBookError::Config)?;

        Ok(CsvConverter {
            config: self.config,
        })
    }

    /// 設定を検証し、ソース列を1つのワークブックに変換する
    ///
    /// `build()?.convert(sources)`の短縮形です。
    pub fn build_workbook<R, I>(self, sources: I) -> Result<FinishedWorkbook, CsvBookError>
    where
        R: Read,
        I: IntoIterator<Item = SourceRecord<R>>,
    {
        self.build()?.convert(sources)
    }
}

/// CSV→XLSX変換のファサード
///
/// # 使用例
///
/// ```rust,no_run
/// use csvbook::{SourceRecord, WorkbookBuilder};
///
/// # fn main() -> Result<(), csvbook::CsvBookError> {
/// let converter = WorkbookBuilder::new().build()?;
/// let workbook = converter.convert(vec![
///     SourceRecord::new("jan.csv", "a,b\n1,2\n".as_bytes()),
///     SourceRecord::new("feb.csv", "a,b\n3,4\n".as_bytes()),
/// ])?;
/// assert_eq!(workbook.sheets().len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CsvConverter {
    /// 変換設定
    config: WorkbookConfig,
}

impl CsvConverter {
    /// 空のワークブックへの書き込みを開始する
    pub fn writer(&self) -> Result<WorkbookWriter, CsvBookError> {
        WorkbookWriter::new(self.config.clone())
    }

    /// ソース列を入力順に1つのワークブックへ変換する
    ///
    /// ソースが空の場合もシートを持たない有効なワークブックを返します。
    pub fn convert<R, I>(&self, sources: I) -> Result<FinishedWorkbook, CsvBookError>
    where
        R: Read,
        I: IntoIterator<Item = SourceRecord<R>>,
    {
        let mut writer = self.writer()?;
        for source in sources {
            writer.append_csv(&source.name, source.content)?;
        }
        writer.finish()
    }
}

/// ステージング先
enum StagingSink {
    Memory(Cursor<Vec<u8>>),
    TempFile(File),
}

impl StagingSink {
    fn open(staging: Staging) -> Result<Self, CsvBookError> {
        match staging {
            Staging::TempFile => Ok(StagingSink::TempFile(tempfile::tempfile()?)),
            Staging::Memory => Ok(StagingSink::Memory(Cursor::new(Vec::new()))),
        }
    }
}

impl Write for StagingSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            StagingSink::Memory(c) => c.write(buf),
            StagingSink::TempFile(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            StagingSink::Memory(c) => c.flush(),
            StagingSink::TempFile(f) => f.flush(),
        }
    }
}

impl Seek for StagingSink {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            StagingSink::Memory(c) => c.seek(pos),
            StagingSink::TempFile(f) => f.seek(pos),
        }
    }
}

/// ワークブックへの逐次書き込み
///
/// `append_csv`でワークシートを追加し、最後に`finish`でパッケージを完成させます。
/// 途中でエラーが発生した場合、このインスタンスは破棄してください
/// （一時ファイルはドロップ時に削除されます）。
pub struct WorkbookWriter {
    zip: ZipWriter<StagingSink>,
    namer: SheetNamer,
    sheets: Vec<SheetEntry>,
    config: WorkbookConfig,
}

impl std::fmt::Debug for WorkbookWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookWriter")
            .field("sheets", &self.sheets)
            .field("config", &self.config)
            .finish()
    }
}

impl WorkbookWriter {
    fn new(config: WorkbookConfig) -> Result<Self, CsvBookError> {
        let sink = StagingSink::open(config.staging)?;
        let namer = if config.strip_extension {
            SheetNamer::new()
        } else {
            SheetNamer::keeping_extension()
        };
        Ok(Self {
            zip: ZipWriter::new(sink),
            namer,
            sheets: Vec::new(),
            config,
        })
    }

    /// CSVストリームを1つのワークシートとして追加する
    ///
    /// # 引数
    ///
    /// * `source_name` - ソース名（ワークシート名の導出に使用）
    /// * `input` - CSVのバイトストリーム（一度だけ読み込まれる）
    ///
    /// # 戻り値
    ///
    /// * `Ok(SheetEntry)` - 追加したワークシートの情報
    /// * `Err(CsvBookError)` - 読み込み・書き込みエラー、または上限超過
    pub fn append_csv<R: Read>(
        &mut self,
        source_name: &str,
        input: R,
    ) -> Result<SheetEntry, CsvBookError> {
        let sheet_id = self.sheets.len() as u32 + 1;
        let name = self.namer.assign(source_name);

        self.zip.start_file(
            worksheet_path(sheet_id),
            crate::writer::entry_options(),
        )?;
        let stats = write_worksheet(
            &mut self.zip,
            input,
            self.config.delimiter,
            &self.config.limits,
            &name,
        )?;

        let entry = SheetEntry {
            sheet_id,
            name,
            source: source_name.to_string(),
            rows: stats.rows,
            columns: stats.columns,
        };
        self.sheets.push(entry.clone());
        Ok(entry)
    }

    /// 追加済みのワークシート
    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    /// パッケージを完成させる
    pub fn finish(mut self) -> Result<FinishedWorkbook, CsvBookError> {
        write_package_parts(&mut self.zip, &self.sheets, Utc::now())?;
        let sink = self.zip.finish()?;

        let content = match sink {
            StagingSink::Memory(cursor) => WorkbookContent::Memory(cursor.into_inner()),
            StagingSink::TempFile(mut file) => {
                file.flush()?;
                let len = file.seek(SeekFrom::End(0))?;
                file.seek(SeekFrom::Start(0))?;
                WorkbookContent::TempFile { file, len }
            }
        };

        Ok(FinishedWorkbook {
            sheets: self.sheets,
            content,
        })
    }
}

/// 完成したワークブックの保持先
#[derive(Debug)]
enum WorkbookContent {
    Memory(Vec<u8>),
    TempFile { file: File, len: u64 },
}

/// ワークブックの非同期リーダー
pub type WorkbookReader = Box<dyn AsyncRead + Send + Unpin>;

/// 完成したワークブック
///
/// 一時ファイルにステージングされた場合、ファイルはこの値（またはそこから
/// 生成したリーダー）のドロップ時に削除されます。
#[derive(Debug)]
pub struct FinishedWorkbook {
    sheets: Vec<SheetEntry>,
    content: WorkbookContent,
}

impl FinishedWorkbook {
    /// ワークシートの一覧（sheetId順）
    pub fn sheets(&self) -> &[SheetEntry] {
        &self.sheets
    }

    /// パッケージのバイト数
    pub fn len(&self) -> u64 {
        match &self.content {
            WorkbookContent::Memory(bytes) => bytes.len() as u64,
            WorkbookContent::TempFile { len, .. } => *len,
        }
    }

    /// パッケージが空かどうか（有効なワークブックでは常に`false`）
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 一時ファイルにステージングされているかどうか
    pub fn is_file_backed(&self) -> bool {
        matches!(self.content, WorkbookContent::TempFile { .. })
    }

    /// パッケージ全体をバイト列として取得する
    pub fn into_bytes(self) -> Result<Vec<u8>, CsvBookError> {
        match self.content {
            WorkbookContent::Memory(bytes) => Ok(bytes),
            WorkbookContent::TempFile { mut file, len } => {
                let mut bytes = Vec::with_capacity(len as usize);
                file.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
        }
    }

    /// パッケージを先頭から読み出す非同期リーダーに変換する
    pub fn into_async_reader(self) -> WorkbookReader {
        match self.content {
            WorkbookContent::Memory(bytes) => Box::new(Cursor::new(bytes)),
            WorkbookContent::TempFile { file, .. } => Box::new(tokio::fs::File::from_std(file)),
        }
    }
}
