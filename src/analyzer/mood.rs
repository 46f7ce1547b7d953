//! Valence/arousal mood classification.
//!
//! Arousal is derived from energy, tempo, loudness and speechiness; the
//! (valence, arousal) point is assigned a quadrant of the affect plane and
//! ranked against a fixed table of mood archetypes.

use serde::{Deserialize, Serialize};

use super::features::FeatureVector;

/// Number of nearest moods kept in a profile.
const CLOSEST_MOODS: usize = 5;
/// Number of nearest moods used for tags and confidence.
const MOOD_TAGS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodTag {
    pub name: &'static str,
    pub valence: f64,
    pub arousal: f64,
    pub quadrant: u8,
}

const fn tag(name: &'static str, valence: f64, arousal: f64, quadrant: u8) -> MoodTag {
    MoodTag {
        name,
        valence: valence / 10.0,
        arousal: arousal / 10.0,
        quadrant,
    }
}

/// Mood archetypes on the valence/arousal plane, rated on a 0-10 scale.
pub static MOOD_TABLE: [MoodTag; 16] = [
    tag("ballad", 6.33, 3.6, 4),
    tag("calm", 6.89, 1.67, 4),
    tag("cool", 6.82, 3.43, 4),
    tag("dark", 5.08, 4.09, 3),
    tag("dramatic", 5.17, 6.59, 2),
    tag("emotional", 5.11, 5.32, 1),
    tag("energetic", 7.57, 6.1, 1),
    tag("epic", 7.19, 4.8, 2),
    tag("fun", 8.37, 6.32, 1),
    tag("happy", 8.47, 6.05, 1),
    tag("melancholic", 3.74, 4.13, 3),
    tag("party", 7.18, 6.08, 1),
    tag("relaxing", 8.19, 4.29, 4),
    tag("sad", 2.1, 3.49, 3),
    tag("soft", 7.13, 3.04, 4),
    tag("upbeat", 7.14, 4.92, 4),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosestMood {
    pub mood: String,
    pub distance: f64,
    pub quadrant: u8,
    pub valence: f64,
    pub arousal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodProfile {
    pub valence: f64,
    pub arousal: f64,
    pub energy: f64,
    pub quadrant: u8,
    pub quadrant_description: String,
    pub closest_moods: Vec<ClosestMood>,
    pub primary_mood: String,
    pub confidence: f64,
    pub mood_tags: Vec<String>,
}

impl Default for MoodProfile {
    fn default() -> Self {
        Self {
            valence: 0.5,
            arousal: 0.5,
            energy: 0.5,
            quadrant: 1,
            quadrant_description: quadrant_description(1).to_string(),
            closest_moods: Vec::new(),
            primary_mood: "unknown".to_string(),
            confidence: 0.0,
            mood_tags: Vec::new(),
        }
    }
}

impl MoodProfile {
    pub fn is_known(&self) -> bool {
        self.primary_mood != "unknown"
    }
}

/// Quadrant of the affect plane; the 0.5 boundaries belong to the "high" side.
pub fn quadrant(valence: f64, arousal: f64) -> u8 {
    match (valence >= 0.5, arousal >= 0.5) {
        (true, true) => 1,
        (false, true) => 2,
        (false, false) => 3,
        (true, false) => 4,
    }
}

pub fn quadrant_description(quadrant: u8) -> &'static str {
    match quadrant {
        1 => "High Valence, High Arousal (Happy, Energetic)",
        2 => "Low Valence, High Arousal (Aggressive, Intense)",
        3 => "Low Valence, Low Arousal (Sad, Calm)",
        4 => "High Valence, Low Arousal (Peaceful, Relaxing)",
        _ => "Unknown",
    }
}

pub fn arousal(energy: f64, tempo: f64, loudness: f64, speechiness: f64) -> f64 {
    let value = 0.4 * energy
        + 0.25 * (tempo / 200.0)
        + 0.25 * ((loudness + 60.0) / 60.0)
        + 0.1 * speechiness;
    value.clamp(0.0, 1.0)
}

/// Every mood in the table ordered by Euclidean distance to the point.
pub fn rank_moods(valence: f64, arousal: f64) -> Vec<ClosestMood> {
    let mut ranked: Vec<ClosestMood> = MOOD_TABLE
        .iter()
        .map(|m| ClosestMood {
            mood: m.name.to_string(),
            distance: (valence - m.valence).hypot(arousal - m.arousal),
            quadrant: m.quadrant,
            valence: m.valence,
            arousal: m.arousal,
        })
        .collect();
    ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    ranked
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoodAnalyzer;

impl MoodAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, features: &FeatureVector) -> MoodProfile {
        let (Some(valence), Some(energy), Some(tempo), Some(loudness), Some(speechiness)) = (
            features.valence,
            features.energy,
            features.tempo,
            features.loudness,
            features.speechiness,
        ) else {
            log::debug!("Missing mood inputs, returning default profile");
            return MoodProfile::default();
        };

        let arousal = arousal(energy, tempo, loudness, speechiness);
        let quadrant = quadrant(valence, arousal);
        let mut closest = rank_moods(valence, arousal);
        closest.truncate(CLOSEST_MOODS);

        let top = &closest[..MOOD_TAGS.min(closest.len())];
        let confidence = if top.is_empty() {
            0.0
        } else {
            let mean_distance = top.iter().map(|m| m.distance).sum::<f64>() / top.len() as f64;
            (1.0 - mean_distance).clamp(0.0, 1.0)
        };
        let mood_tags = top.iter().map(|m| m.mood.clone()).collect();
        let primary_mood = closest
            .first()
            .map_or_else(|| "unknown".to_string(), |m| m.mood.clone());

        MoodProfile {
            valence,
            arousal,
            energy,
            quadrant,
            quadrant_description: quadrant_description(quadrant).to_string(),
            closest_moods: closest,
            primary_mood,
            confidence,
            mood_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(valence: f64, energy: f64, tempo: f64, loudness: f64, speech: f64) -> FeatureVector {
        FeatureVector {
            valence: Some(valence),
            energy: Some(energy),
            tempo: Some(tempo),
            loudness: Some(loudness),
            speechiness: Some(speech),
            ..FeatureVector::unknown()
        }
    }

    #[test]
    fn missing_inputs_give_the_default_profile() {
        let profile = MoodAnalyzer::new().analyze(&FeatureVector::unknown());
        assert_eq!(profile, MoodProfile::default());
        assert_eq!(profile.valence, 0.5);
        assert_eq!(profile.arousal, 0.5);
        assert_eq!(profile.energy, 0.5);
        assert_eq!(profile.quadrant, 1);
        assert_eq!(profile.primary_mood, "unknown");
        assert_eq!(profile.confidence, 0.0);
        assert!(profile.mood_tags.is_empty());
        assert!(profile.closest_moods.is_empty());

        let mut partial = features(0.7, 0.7, 120.0, -10.0, 0.1);
        partial.loudness = None;
        assert_eq!(MoodAnalyzer::new().analyze(&partial), MoodProfile::default());
    }

    #[test]
    fn arousal_blend() {
        let a = arousal(0.9, 180.0, 0.0, 0.0);
        assert!((a - 0.835).abs() < 1e-9);
        assert_eq!(arousal(1.0, 400.0, 0.0, 1.0), 1.0);
        assert_eq!(arousal(0.0, 0.0, -80.0, 0.0), 0.0);
    }

    #[test]
    fn quadrant_law() {
        let grid = [0.0, 0.25, 0.4999, 0.5, 0.75, 1.0];
        for &v in &grid {
            for &a in &grid {
                let q = quadrant(v, a);
                assert_eq!(q == 1, v >= 0.5 && a >= 0.5);
                assert_eq!(q == 2, v < 0.5 && a >= 0.5);
                assert_eq!(q == 3, v < 0.5 && a < 0.5);
                assert_eq!(q == 4, v >= 0.5 && a < 0.5);
            }
        }
    }

    #[test]
    fn corner_point_ranks_ascending() {
        let ranked = rank_moods(1.0, 1.0);
        assert_eq!(ranked.len(), MOOD_TABLE.len());
        assert!(ranked.windows(2).all(|w| w[0].distance < w[1].distance));
        let happy = ranked.iter().find(|m| m.mood == "happy").unwrap();
        let expected = ((1.0_f64 - 0.847).powi(2) + (1.0_f64 - 0.605).powi(2)).sqrt();
        assert!((happy.distance - expected).abs() < 1e-9);
    }

    #[test]
    fn profile_at_the_corner() {
        // energy 1, tempo 200, loudness 0, speechiness 1 -> arousal 1.
        let profile = MoodAnalyzer::new().analyze(&features(1.0, 1.0, 200.0, 0.0, 1.0));
        assert!((profile.arousal - 1.0).abs() < 1e-12);
        assert_eq!(profile.quadrant, 1);
        assert_eq!(profile.closest_moods.len(), 5);
        assert!(profile
            .closest_moods
            .windows(2)
            .all(|w| w[0].distance < w[1].distance));
        assert_eq!(profile.primary_mood, "fun");
        assert_eq!(profile.mood_tags, vec!["fun", "happy", "energetic"]);
        assert!((0.0..=1.0).contains(&profile.confidence));
    }

    #[test]
    fn calm_point_is_calm() {
        // arousal = 0.4*0.1 + 0.25*0.3 + 0.25*(20/60) + 0 = 0.1983
        let profile = MoodAnalyzer::new().analyze(&features(0.69, 0.1, 60.0, -40.0, 0.0));
        assert_eq!(profile.quadrant, 4);
        assert_eq!(profile.primary_mood, "calm");
        assert_eq!(
            profile.quadrant_description,
            "High Valence, Low Arousal (Peaceful, Relaxing)"
        );
        assert!(profile.confidence > 0.8);
    }

    #[test]
    fn confidence_is_bounded() {
        for &(v, e) in &[(0.0, 0.0), (1.0, 1.0), (0.5, 0.5), (0.0, 1.0)] {
            let p = MoodAnalyzer::new().analyze(&features(v, e, 120.0, -20.0, 0.1));
            assert!((0.0..=1.0).contains(&p.confidence));
        }
    }

    #[test]
    fn table_quadrants_are_in_range() {
        assert_eq!(MOOD_TABLE.len(), 16);
        assert!(MOOD_TABLE.iter().all(|m| (1..=4).contains(&m.quadrant)));
        assert!(MOOD_TABLE
            .iter()
            .all(|m| (0.0..=1.0).contains(&m.valence) && (0.0..=1.0).contains(&m.arousal)));
    }
}
