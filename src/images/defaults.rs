//! Placeholder token art for characters without uploaded images.

use crate::model::Team;

use super::decode::DecodedImage;

/// Slot used for the placeholder shown when a URL could not be fetched.
pub const NETWORK_ERROR_SLOT: i32 = -1;

const SIZE: u32 = 128;

fn team_color(team: Team) -> [u8; 3] {
    match team {
        Team::Townsfolk => [31, 101, 255],
        Team::Outsider => [70, 213, 255],
        Team::Minion => [255, 97, 97],
        Team::Demon => [206, 1, 0],
        Team::Traveller => [204, 153, 255],
        Team::Fabled => [236, 212, 57],
        Team::Special => [160, 160, 160],
    }
}

/// Token placeholder: a filled disc in the team color on a transparent
/// square. Slot 1 (the other alignment) is shaded darker, slot 2 paler; the
/// network-error slot is grey with a red ring.
pub fn placeholder(team: Team, slot: i32) -> DecodedImage {
    let [r, g, b] = team_color(team);
    let (fill, ring) = match slot {
        NETWORK_ERROR_SLOT => ([90, 90, 90], [200, 30, 30]),
        1 => ([r / 2, g / 2, b / 2], [20, 20, 20]),
        2 => (
            [r / 2 + 127, g / 2 + 127, b / 2 + 127],
            [20, 20, 20],
        ),
        _ => ([r, g, b], [20, 20, 20]),
    };

    let center = (SIZE as f32 - 1.0) / 2.0;
    let outer = SIZE as f32 / 2.0 - 1.0;
    let inner = outer - SIZE as f32 / 16.0;
    let mut rgba = Vec::with_capacity((SIZE * SIZE * 4) as usize);

    for y in 0..SIZE {
        for x in 0..SIZE {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let d = (dx * dx + dy * dy).sqrt();
            let pixel = if d <= inner {
                [fill[0], fill[1], fill[2], 255]
            } else if d <= outer {
                [ring[0], ring[1], ring[2], 255]
            } else {
                [0, 0, 0, 0]
            };
            rgba.extend_from_slice(&pixel);
        }
    }

    DecodedImage {
        width: SIZE,
        height: SIZE,
        rgba,
    }
}
