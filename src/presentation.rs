use serde::{Deserialize, Serialize};

use crate::model::{AnalysisResult, BestGuessCoordinate, Candidate, GroundingReference};
use crate::reconcile::{map_search_uri, Reconciler};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
}

pub struct Strings {
    pub unknown_location: &'static str,
    pub analysis_failed: &'static str,
    pub no_text_response: &'static str,
    pub prompt: &'static str,
}

const EN: Strings = Strings {
    unknown_location: "Unknown location",
    analysis_failed: "Could not analyze the image. Check the API key and try again.",
    no_text_response: "The model returned no text response.",
    prompt: r#"You are a professional GeoGuessr player. Analyze this image to determine the exact location.

Look for the following clues:
1. Road markings and the side of the road traffic drives on.
2. Road signs (fonts, colors, shapes, the backs of signs).
3. Language and script.
4. Architecture, utility poles, bollards.
5. Vegetation, soil, climate.
6. Camera car meta (if parts of the car are visible).

First give a short conclusion: Country, Region, City (if possible).
Then describe the clues you found in detail.
Finally, end your answer with exactly one fenced json block containing your best guess:
```json
{"lat": <latitude>, "lng": <longitude>, "locationName": "<place name>"}
```"#,
};

const RU: Strings = Strings {
    unknown_location: "Неизвестное место",
    analysis_failed: "Не удалось проанализировать изображение. Проверьте API ключ и попробуйте снова.",
    no_text_response: "Не удалось получить текстовый ответ.",
    prompt: r#"Ты профессиональный игрок в GeoGuessr. Проанализируй это изображение, чтобы определить точное местоположение.

Ищи следующие подсказки:
1. Дорожная разметка, сторона движения.
2. Дорожные знаки (шрифты, цвета, форма, обратная сторона).
3. Язык и письменность.
4. Архитектура, столбы ЛЭП, болларды (столбики).
5. Растительность, почва, климат.
6. "Google Car meta" (если видно части машины).

Сначала дай краткий вывод: Страна, Регион, Город (если возможно).
Затем подробно опиши найденные подсказки.
В самом конце дай ровно один блок json с лучшей догадкой:
```json
{"lat": <широта>, "lng": <долгота>, "locationName": "<название места>"}
```"#,
};

impl Language {
    pub fn strings(self) -> &'static Strings {
        match self {
            Language::En => &EN,
            Language::Ru => &RU,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayLine {
    pub text: String,
    pub header: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    #[serde(flatten)]
    pub candidate: Candidate,
    /// The leading marker, drawn in the highlight color.
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub title: String,
    pub uri: Option<String>,
}

/// Everything the page needs to render a finished analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisView {
    pub display_lines: Vec<DisplayLine>,
    pub markers: Vec<Marker>,
    pub map_links: Vec<Link>,
    pub web_links: Vec<Link>,
    pub best_guess: Option<BestGuessCoordinate>,
    pub best_guess_uri: Option<String>,
}

impl AnalysisView {
    pub fn build(result: &AnalysisResult, reconciler: &Reconciler, language: Language) -> Self {
        let unknown = language.strings().unknown_location;

        let markers = reconciler
            .reconcile(result.best_guess.as_ref(), result.place_references(), unknown)
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| Marker { candidate, primary: i == 0 })
            .collect();

        let mut map_links = Vec::new();
        let mut web_links = Vec::new();
        for reference in &result.grounding_references {
            match reference {
                GroundingReference::Place { uri, title } => map_links.push(Link {
                    title: if title.is_empty() { unknown.to_string() } else { title.clone() },
                    uri: uri.clone(),
                }),
                GroundingReference::Web { uri, title } => web_links.push(Link {
                    title: title.clone(),
                    uri: Some(uri.clone()),
                }),
            }
        }

        Self {
            display_lines: format_lines(&result.display_text),
            markers,
            map_links,
            web_links,
            best_guess: result.best_guess.clone(),
            best_guess_uri: result.best_guess.as_ref().map(|g| map_search_uri(g.lat, g.lng)),
        }
    }
}

/// Lines ending in `:` or opening with `**` are treated as headers; bold
/// markers are dropped everywhere.
pub fn format_lines(text: &str) -> Vec<DisplayLine> {
    text.split('\n')
        .map(|line| {
            let trimmed = line.trim();
            DisplayLine {
                header: trimmed.ends_with(':') || trimmed.starts_with("**"),
                text: line.replace("**", ""),
            }
        })
        .collect()
}
