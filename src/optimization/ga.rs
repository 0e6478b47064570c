//! Default evolutionary method: a real-valued genetic algorithm.
//!
//! Genes are normalised to [0, 1]. Each generation keeps the elite unchanged
//! and fills the rest with tournament-selected, uniformly crossed and
//! Gaussian-mutated children.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::config::OptimizationConfiguration;
use super::method::{Candidate, Method, Ranked};
use crate::error::MethodError;

pub struct GeneticAlgorithm {
    dimension: usize,
    elite_fraction: f64,
    mutation_rate: f64,
    mutation: Normal<f64>,
    rng: StdRng,
}

impl GeneticAlgorithm {
    pub fn from_configuration(config: &OptimizationConfiguration) -> Result<Self, MethodError> {
        if config.parameters.is_empty() {
            return Err(MethodError::InvalidConfiguration(
                "at least one parameter is required".into(),
            ));
        }
        let settings = &config.method;
        let mutation = Normal::new(0.0, settings.mutation_strength)
            .map_err(|e| MethodError::InvalidConfiguration(format!("mutation_strength: {e}")))?;
        Ok(Self {
            dimension: config.parameters.len(),
            elite_fraction: settings.elite_fraction.clamp(0.0, 1.0),
            mutation_rate: settings.mutation_rate.clamp(0.0, 1.0),
            mutation,
            rng: StdRng::seed_from_u64(config.evolution_seed),
        })
    }

    fn elite_count(&self, population: usize) -> usize {
        ((self.elite_fraction * population as f64).round() as usize).clamp(1, population)
    }

    /// Binary tournament over a best-first ranking: the lower index wins.
    fn select<'a>(&mut self, ranked: &'a [Ranked]) -> &'a Candidate {
        let a = self.rng.gen_range(0..ranked.len());
        let b = self.rng.gen_range(0..ranked.len());
        &ranked[a.min(b)].candidate
    }

    fn breed(&mut self, left: &Candidate, right: &Candidate) -> Candidate {
        let values = left
            .values
            .iter()
            .zip(&right.values)
            .map(|(l, r)| {
                let mut gene = if self.rng.gen_bool(0.5) { *l } else { *r };
                if self.rng.gen_bool(self.mutation_rate) {
                    gene += self.mutation.sample(&mut self.rng);
                }
                gene.clamp(0.0, 1.0)
            })
            .collect();
        Candidate::new(values)
    }
}

impl Method for GeneticAlgorithm {
    fn initial_population(&mut self, count: usize) -> Vec<Candidate> {
        (0..count)
            .map(|_| {
                let values = (0..self.dimension)
                    .map(|_| self.rng.gen_range(0.0..=1.0))
                    .collect();
                Candidate::new(values)
            })
            .collect()
    }

    fn evolve(&mut self, ranked: &[Ranked]) -> Result<Vec<Candidate>, MethodError> {
        if ranked.is_empty() {
            return Err(MethodError::EmptyPopulation);
        }
        let size = ranked.len();
        let mut next: Vec<Candidate> = ranked[..self.elite_count(size)]
            .iter()
            .map(|r| r.candidate.clone())
            .collect();
        while next.len() < size {
            let left = self.select(ranked);
            let right = self.select(ranked);
            next.push(self.breed(left, right));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::method::ParameterDefinition;

    fn config(seed: u64) -> OptimizationConfiguration {
        OptimizationConfiguration {
            evolution_seed: seed,
            parameters: vec![
                ParameterDefinition {
                    name: "x".into(),
                    meta: String::new(),
                    scale: 1.0,
                },
                ParameterDefinition {
                    name: "y".into(),
                    meta: String::new(),
                    scale: 1.0,
                },
            ],
            ..Default::default()
        }
    }

    fn rank_by_sum(ga: &GeneticAlgorithm, population: Vec<Candidate>) -> Vec<Ranked> {
        let fitness: Vec<f64> = population.iter().map(|c| c.values.iter().sum()).collect();
        ga.rank(population, &fitness).unwrap()
    }

    #[test]
    fn requires_parameters() {
        let err = GeneticAlgorithm::from_configuration(&OptimizationConfiguration::default())
            .err()
            .unwrap();
        assert!(matches!(err, MethodError::InvalidConfiguration(_)));
    }

    #[test]
    fn same_seed_same_population() {
        let mut a = GeneticAlgorithm::from_configuration(&config(11)).unwrap();
        let mut b = GeneticAlgorithm::from_configuration(&config(11)).unwrap();
        assert_eq!(a.initial_population(5), b.initial_population(5));

        let mut c = GeneticAlgorithm::from_configuration(&config(12)).unwrap();
        assert_ne!(a.initial_population(5), c.initial_population(5));
    }

    #[test]
    fn evolve_keeps_size_elite_and_bounds() {
        let mut ga = GeneticAlgorithm::from_configuration(&config(3)).unwrap();
        let population = ga.initial_population(10);
        let ranked = rank_by_sum(&ga, population);
        let best = ranked[0].candidate.clone();

        let next = ga.evolve(&ranked).unwrap();
        assert_eq!(next.len(), 10);
        assert_eq!(next[0], best);
        for candidate in &next {
            assert_eq!(candidate.values.len(), 2);
            assert!(candidate.values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn evolving_improves_best_fitness() {
        let mut ga = GeneticAlgorithm::from_configuration(&config(5)).unwrap();
        let mut population = ga.initial_population(20);
        let first_best = rank_by_sum(&ga, population.clone())[0].fitness;
        for _ in 0..30 {
            let ranked = rank_by_sum(&ga, population);
            population = ga.evolve(&ranked).unwrap();
        }
        let last_best = rank_by_sum(&ga, population)[0].fitness;
        assert!(last_best >= first_best);
    }

    #[test]
    fn evolve_rejects_empty_population() {
        let mut ga = GeneticAlgorithm::from_configuration(&config(1)).unwrap();
        assert!(matches!(ga.evolve(&[]), Err(MethodError::EmptyPopulation)));
    }
}
