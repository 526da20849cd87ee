//! Routing: map quality profiles onto extraction methods.
//!
//! Two granularities. The document route picks the headline method and the
//! preprocessing set from the aggregated profile; the per-page routes
//! decide which pages actually need OCR in hybrid extraction. Both are
//! pure decision tables — no I/O — so they are trivially testable and the
//! decision log can quote their rationale verbatim.

use crate::capability::Capabilities;
use crate::config::PipelineConfig;
use crate::model::{
    DocRouteMethod, DocumentProfile, PageProfile, PageRoute, PageRouteMethod, Preprocessing,
    RouteDecision,
};

/// Raster-level hints the profiler may not carry; both default to absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterHints {
    /// Page orientation detected as rotated.
    pub orientation_abnormal: bool,
    /// Skew detected in the raster.
    pub skew_detected: bool,
}

/// Decide the document-level route from the aggregated profile.
///
/// When the OCR capability is absent, OCR routes downgrade to fast-parse
/// (best effort) rather than failing; the caller records the limitation.
pub fn route_document(
    file: &str,
    profile: &DocumentProfile,
    caps: &Capabilities,
    hints: RasterHints,
    cfg: &PipelineConfig,
) -> RouteDecision {
    let score = profile.readability_score;
    let [tier_a, tier_b, tier_c, tier_d] = cfg.readability_tier_thresholds;

    let (mut method, mut engine, mut preprocessing, rationale): (
        DocRouteMethod,
        &str,
        Vec<Preprocessing>,
        String,
    ) = if profile.has_text_layer && score >= tier_a {
        (
            DocRouteMethod::FastParse,
            "pdf-parse",
            vec![],
            format!("clean text layer, median readability {score:.0} (tier A)"),
        )
    } else if profile.has_text_layer && score >= tier_b {
        (
            DocRouteMethod::FastParse,
            "pdf-parse",
            vec![],
            format!("usable text layer, median readability {score:.0}"),
        )
    } else if score >= tier_b {
        (
            DocRouteMethod::OcrStandard,
            "tesseract",
            vec![Preprocessing::Deskew],
            format!("no clean text layer, readability {score:.0} suits standard OCR"),
        )
    } else if score >= tier_c {
        (
            DocRouteMethod::OcrEnhanced,
            "tesseract",
            vec![Preprocessing::Deskew, Preprocessing::Denoise],
            format!("degraded scan, readability {score:.0} needs enhanced OCR"),
        )
    } else if score >= tier_d {
        (
            DocRouteMethod::OcrEnhanced,
            "tesseract",
            vec![
                Preprocessing::Deskew,
                Preprocessing::Denoise,
                Preprocessing::ContrastEnhance,
                Preprocessing::Binarize,
            ],
            format!("severely degraded scan, readability {score:.0}, full preprocessing"),
        )
    } else {
        (
            DocRouteMethod::ManualReview,
            "-",
            vec![],
            format!("readability {score:.0} below automation floor"),
        )
    };

    if hints.orientation_abnormal {
        preprocessing.push(Preprocessing::AutoRotate);
    }
    if hints.skew_detected {
        preprocessing.push(Preprocessing::Deskew);
    }
    preprocessing.sort();
    preprocessing.dedup();

    let mut rationale = rationale;
    if matches!(
        method,
        DocRouteMethod::OcrStandard | DocRouteMethod::OcrEnhanced
    ) && !caps.can_ocr()
    {
        method = DocRouteMethod::FastParse;
        engine = "pdf-parse";
        preprocessing.clear();
        rationale.push_str("; OCR capability absent, downgraded to best-effort fast-parse");
    }

    RouteDecision {
        file: file.to_string(),
        method,
        engine: engine.to_string(),
        preprocessing,
        rationale,
        quality_tier: profile.quality_tier,
        readability_score: score,
        routed_at: chrono::Utc::now().to_rfc3339(),
    }
}

/// Decide the per-page routes from the page profiles.
pub fn route_pages(profiles: &[PageProfile], cfg: &PipelineConfig) -> Vec<PageRoute> {
    let tier_c = cfg.readability_tier_thresholds[2];
    profiles
        .iter()
        .map(|p| {
            let (method, needs_ocr, reason) = if p.empty {
                (
                    PageRouteMethod::Skip,
                    false,
                    format!("page {} empty ({} chars)", p.page_number, p.char_count),
                )
            } else if !p.is_degraded {
                (
                    PageRouteMethod::FastParse,
                    false,
                    format!(
                        "page {} clean (readability {:.0}, garbage {:.2})",
                        p.page_number, p.readability_score, p.word_garbage_score
                    ),
                )
            } else if p.readability_score >= tier_c {
                (
                    PageRouteMethod::OcrStandard,
                    true,
                    format!(
                        "page {} degraded (readability {:.0}), standard OCR",
                        p.page_number, p.readability_score
                    ),
                )
            } else {
                (
                    PageRouteMethod::OcrEnhanced,
                    true,
                    format!(
                        "page {} heavily degraded (readability {:.0}), enhanced OCR",
                        p.page_number, p.readability_score
                    ),
                )
            };
            PageRoute {
                page: p.page_number,
                method,
                needs_ocr,
                reason,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NoiseLevel, QualityTier};

    fn profile(score: f64, has_text_layer: bool) -> DocumentProfile {
        DocumentProfile {
            page_profiles: vec![],
            readability_score: score,
            quality_tier: crate::pipeline::profile::tier_for(score, &[80.0, 60.0, 40.0, 20.0]),
            noise_level: NoiseLevel::Low,
            degraded_pages: vec![],
            degraded_count: 0,
            clean_count: 1,
            is_mixed_quality: false,
            has_text_layer,
        }
    }

    fn page_profile(n: usize, score: f64, degraded: bool, empty: bool) -> PageProfile {
        PageProfile {
            page_number: n,
            readability_score: score,
            noise_level: NoiseLevel::Low,
            word_garbage_score: 0.0,
            quality_tier: QualityTier::B,
            char_count: if empty { 0 } else { 1200 },
            is_degraded: degraded,
            empty,
            propagated: None,
        }
    }

    fn ocr_caps() -> Capabilities {
        let mut caps = Capabilities::all_absent();
        caps.pdftotext = true;
        caps.pdfinfo = true;
        caps.pdftoppm = true;
        caps.tesseract = true;
        caps
    }

    #[test]
    fn doc_route_table_matches_bands() {
        let cfg = PipelineConfig::default();
        let caps = ocr_caps();
        let cases = [
            (90.0, true, DocRouteMethod::FastParse, 0usize),
            (65.0, true, DocRouteMethod::FastParse, 0),
            (65.0, false, DocRouteMethod::OcrStandard, 1),
            (45.0, false, DocRouteMethod::OcrEnhanced, 2),
            (25.0, false, DocRouteMethod::OcrEnhanced, 4),
            (10.0, false, DocRouteMethod::ManualReview, 0),
        ];
        for (score, layer, method, prep_count) in cases {
            let d = route_document(
                "x.pdf",
                &profile(score, layer),
                &caps,
                RasterHints::default(),
                &cfg,
            );
            assert_eq!(d.method, method, "score {score}");
            assert_eq!(d.preprocessing.len(), prep_count, "score {score}");
        }
    }

    #[test]
    fn hints_add_deduplicated_preprocessing() {
        let cfg = PipelineConfig::default();
        let d = route_document(
            "x.pdf",
            &profile(65.0, false),
            &ocr_caps(),
            RasterHints {
                orientation_abnormal: true,
                skew_detected: true,
            },
            &cfg,
        );
        // deskew from the band plus the hint dedupes to one entry.
        assert_eq!(
            d.preprocessing,
            vec![Preprocessing::AutoRotate, Preprocessing::Deskew]
        );
    }

    #[test]
    fn missing_ocr_downgrades_to_fast_parse() {
        let cfg = PipelineConfig::default();
        let caps = Capabilities::all_absent();
        let d = route_document(
            "x.pdf",
            &profile(45.0, false),
            &caps,
            RasterHints::default(),
            &cfg,
        );
        assert_eq!(d.method, DocRouteMethod::FastParse);
        assert!(d.rationale.contains("downgraded"));
    }

    #[test]
    fn page_routes_follow_profile() {
        let cfg = PipelineConfig::default();
        let profiles = vec![
            page_profile(1, 90.0, false, false),
            page_profile(2, 50.0, true, false),
            page_profile(3, 20.0, true, false),
            page_profile(4, 0.0, true, true),
        ];
        let routes = route_pages(&profiles, &cfg);
        assert_eq!(routes[0].method, PageRouteMethod::FastParse);
        assert!(!routes[0].needs_ocr);
        assert_eq!(routes[1].method, PageRouteMethod::OcrStandard);
        assert!(routes[1].needs_ocr);
        assert_eq!(routes[2].method, PageRouteMethod::OcrEnhanced);
        assert_eq!(routes[3].method, PageRouteMethod::Skip);
        for r in &routes {
            assert!(!r.reason.is_empty());
        }
    }
}
