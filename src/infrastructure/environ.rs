// 環境設定ローダー
//
// `env/<profile>.yml` のステージ別セクションをプロセス環境変数とマージし、
// 不変の設定マップを作成する。プロセス環境変数自体は書き換えない。
//
// - プロファイル: ENV → PROFILE（デフォルト: none）
// - ステージ: STAGE → NODE_ENV（デフォルト: local）
// - `!`で始まる値はプロセス環境変数を強制上書き
// - 配列は ", " で結合

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value as YamlValue;
use thiserror::Error;
use tracing::{debug, info};

/// 環境設定のエラー型
#[derive(Debug, Error)]
pub enum EnvironError {
    /// プロファイルファイルの読み込みに失敗
    #[error("プロファイルファイルの読み込みに失敗: {path}: {message}")]
    ReadError { path: String, message: String },

    /// YAMLのパースに失敗
    #[error("YAMLのパースに失敗: {0}")]
    ParseError(String),

    /// 必須の設定値が存在しない
    #[error("環境変数が設定されていません: {0}")]
    MissingVar(String),

    /// 設定値の形式が不正
    #[error("設定値が不正です: {key}={value}")]
    InvalidValue { key: String, value: String },
}

/// マージ済みの環境設定
#[derive(Debug, Clone, Default)]
pub struct Environ {
    values: BTreeMap<String, String>,
    profile: String,
    stage: String,
}

impl Environ {
    /// デフォルトのプロファイル名（ファイルを読まない）
    pub const DEFAULT_PROFILE: &'static str = "none";
    /// デフォルトのステージ名
    pub const DEFAULT_STAGE: &'static str = "local";
    /// デフォルトのプロファイルディレクトリ
    pub const DEFAULT_DIR: &'static str = "env";

    /// プロセス環境変数と`env/<profile>.yml`から設定を読み込む
    pub fn load() -> Result<Self, EnvironError> {
        let process = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self::load_from(Self::DEFAULT_DIR, process)
    }

    /// 指定ディレクトリと環境変数マップから設定を読み込む
    ///
    /// # Arguments
    /// * `dir` - プロファイルYAMLを置くディレクトリ
    /// * `process` - プロセス環境変数のスナップショット
    pub fn load_from(dir: impl AsRef<Path>, process: BTreeMap<String, String>) -> Result<Self, EnvironError> {
        let profile = Self::first_of(&process, &["ENV", "PROFILE"]).unwrap_or(Self::DEFAULT_PROFILE).to_string();
        let stage = Self::first_of(&process, &["STAGE", "NODE_ENV"]).unwrap_or(Self::DEFAULT_STAGE).to_string();

        let path: PathBuf = dir.as_ref().join(format!("{profile}.yml"));
        let values = if profile == Self::DEFAULT_PROFILE && !path.exists() {
            debug!(profile = %profile, "プロファイルファイルなし、プロセス環境変数のみ使用");
            process
        } else {
            let text = std::fs::read_to_string(&path).map_err(|e| EnvironError::ReadError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            Self::merge_yaml(process, &text, &stage)?
        };

        info!(profile = %profile, stage = %stage, count = values.len(), "環境設定を読み込み");
        Ok(Self { values, profile, stage })
    }

    /// 環境変数マップのみから作成（テスト用）
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values: BTreeMap<String, String> = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let profile = Self::first_of(&values, &["ENV", "PROFILE"]).unwrap_or(Self::DEFAULT_PROFILE).to_string();
        let stage = Self::first_of(&values, &["STAGE", "NODE_ENV"]).unwrap_or(Self::DEFAULT_STAGE).to_string();
        Self { values, profile, stage }
    }

    /// YAMLのステージセクションをプロセス環境変数にマージする
    ///
    /// `!`付きの値のみプロセス環境変数を上書きし、それ以外は未設定のキーだけを補う。
    pub fn merge_yaml(
        mut process: BTreeMap<String, String>,
        yaml: &str,
        stage: &str,
    ) -> Result<BTreeMap<String, String>, EnvironError> {
        let doc: YamlValue = serde_yaml::from_str(yaml).map_err(|e| EnvironError::ParseError(e.to_string()))?;

        let Some(section) = doc.get(stage).and_then(|s| s.as_mapping()) else {
            debug!(stage = stage, "ステージセクションなし");
            return Ok(process);
        };

        for (key, value) in section {
            let Some(key) = key.as_str() else { continue };
            let Some(text) = Self::stringify(value) else { continue };

            match text.strip_prefix('!') {
                Some(forced) => {
                    process.insert(key.to_string(), forced.to_string());
                }
                None => {
                    process.entry(key.to_string()).or_insert(text);
                }
            }
        }

        Ok(process)
    }

    /// YAML値を環境変数の文字列表現に変換
    fn stringify(value: &YamlValue) -> Option<String> {
        match value {
            YamlValue::Null => None,
            YamlValue::Bool(b) => Some(b.to_string()),
            YamlValue::Number(n) => Some(n.to_string()),
            YamlValue::String(s) => Some(s.clone()),
            YamlValue::Sequence(items) => Some(
                items
                    .iter()
                    .filter_map(Self::stringify)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            YamlValue::Mapping(_) | YamlValue::Tagged(_) => serde_json::to_string(value).ok(),
        }
    }

    fn first_of<'a>(values: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
        keys.iter()
            .find_map(|k| values.get(*k))
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// 設定値を取得
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// 設定値を取得（未設定ならデフォルト）
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// 必須の設定値を取得
    pub fn require(&self, key: &str) -> Result<&str, EnvironError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EnvironError::MissingVar(key.to_string()))
    }

    /// 数値の設定値を取得
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, EnvironError> {
        self.get(key)
            .map(|v| {
                v.trim().parse().map_err(|_| EnvironError::InvalidValue {
                    key: key.to_string(),
                    value: v.to_string(),
                })
            })
            .transpose()
    }

    /// 選択されたプロファイル名
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// 選択されたステージ名
    pub fn stage(&self) -> &str {
        &self.stage
    }
}
