use gifstream_core::{Bounds, Color, Frame, FrameProducer, Palette};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Demo producer: paints every column with a random color, snapped to a
/// palette chosen once at startup.
pub struct RandomColumns {
    bounds: Bounds,
    palette: Palette,
    rng: StdRng,
}

impl RandomColumns {
    pub fn new(bounds: Bounds, colors: usize, seed: Option<u64>) -> anyhow::Result<Self> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let palette = Palette::new((0..colors).map(|_| random_color(&mut rng)).collect())?;
        Ok(Self { bounds, palette, rng })
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }
}

fn random_color(rng: &mut impl Rng) -> Color {
    Color::rgb(rng.gen(), rng.gen(), rng.gen())
}

impl FrameProducer for RandomColumns {
    fn produce(&mut self) -> anyhow::Result<Frame> {
        let width = self.bounds.width as usize;
        let columns: Vec<u8> = (0..width)
            .map(|_| self.palette.nearest(random_color(&mut self.rng)))
            .collect();

        let mut pixels = Vec::with_capacity(self.bounds.area());
        for _ in 0..self.bounds.height {
            pixels.extend_from_slice(&columns);
        }
        Ok(Frame::new(self.bounds, self.palette.clone(), pixels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_uniform() {
        let bounds = Bounds::sized(16, 9).unwrap();
        let mut producer = RandomColumns::new(bounds, 3, Some(7)).unwrap();
        let frame = producer.produce().unwrap();

        assert_eq!(frame.palette().len(), 3);
        for x in 0..16 {
            let top = frame.index_at(x, 0).unwrap();
            assert!((top as usize) < 3);
            for y in 1..9 {
                assert_eq!(frame.index_at(x, y), Some(top));
            }
        }
    }

    #[test]
    fn seed_makes_palette_repeatable() {
        let bounds = Bounds::sized(4, 4).unwrap();
        let a = RandomColumns::new(bounds, 5, Some(42)).unwrap();
        let b = RandomColumns::new(bounds, 5, Some(42)).unwrap();
        assert_eq!(a.palette(), b.palette());
    }

    #[test]
    fn palette_size_is_validated() {
        let bounds = Bounds::sized(4, 4).unwrap();
        assert!(RandomColumns::new(bounds, 0, None).is_err());
        assert!(RandomColumns::new(bounds, 300, None).is_err());
    }
}
