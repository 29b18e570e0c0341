use rand::Rng;

use soil_shared::telemetry_task::SoilProbe;

/// Stand-in soil probe producing plausible readings until the analog front-end
/// is wired up: 10.00 to 44.99 °C and 0.00 to 99.99 % moisture
#[derive(Debug, Default)]
pub struct PlaceholderProbe;

impl SoilProbe for PlaceholderProbe {
    fn soil_temperature(&mut self) -> f32 {
        let mut rng = rand::thread_rng();
        rng.gen_range(10..45) as f32 + rng.gen_range(0..100) as f32 / 100.0
    }

    fn soil_moisture(&mut self) -> f32 {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..100) as f32 + rng.gen_range(0..100) as f32 / 100.0
    }
}
