use crate::cinfo;
use crate::data::Example;
use crate::fitness::{CvFitness, FitnessFunction};
use crate::genotype::Genotype;
use crate::param::Param;
use crate::population::{FitnessCache, Population};
use crate::utils::display_generation;
use log::{debug, info};
use rand::seq::index::sample;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::time::Instant;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

//-----------------------------------------------------------------------------
// Genetic Algorithm core functions
//-----------------------------------------------------------------------------

/// Main function to run the genetic algorithm
///
/// # Arguments
///
/// * `examples` - The labelled examples the fitness cross-validates on.
/// * `param` - Parameters for the genetic algorithm.
/// * `running` - Atomic boolean to control the running state of the algorithm.
///
/// # Returns
///
/// A vector of populations representing the evolution over generations (only the
/// last one unless `general.keep_trace`), or an error when the configuration is invalid.
pub fn ga(examples: &[Example], param: &Param, running: Arc<AtomicBool>) -> Result<Vec<Population>, String> {
    let time = Instant::now();

    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);
    let seed = Genotype::from_param(param)?;
    let fitness = CvFitness::new(examples, param, &mut rng)?;
    info!("Fitness computed on {} folds over {} examples", fitness.cv.len(), examples.len());

    let base_pop = generate_pop(&seed, param, &mut rng);
    info!(
        "Population size: {}, {} feature genes, {} hyperparameter genes",
        base_pop.len(),
        seed.features.len(),
        seed.hyperparameters.len()
    );

    let populations = iterative_evolution(&base_pop, &fitness, param, running, &mut rng);

    let elapsed = time.elapsed();
    info!("Genetic algorithm computed {:?} generations in {:.2?}", populations.len(), elapsed);

    Ok(populations)
}

/// Generate the initial population: clones of `seed`, each expressed independently
///
/// # Arguments
///
/// * `seed` - The genotype every genotype of the population is cloned from.
/// * `param` - Parameters for the genetic algorithm.
/// * `rng` - Random number generator.
///
/// # Returns
///
/// A population of `ga.population_size` unevaluated genotypes.
pub fn generate_pop(seed: &Genotype, param: &Param, rng: &mut ChaCha8Rng) -> Population {
    let mut pop = Population::new();
    for _ in 0..param.ga.population_size {
        let mut genotype = seed.clone();
        genotype.express(rng);
        genotype.epoch = 0;
        pop.genotypes.push(genotype);
    }
    pop
}

/// Run the evolution loop until a stop criterion is met
///
/// # Arguments
///
/// * `base_pop` - The initial (possibly unevaluated) population.
/// * `fitness` - The fitness oracle.
/// * `param` - Parameters for the genetic algorithm.
/// * `running` - Atomic boolean to control the running state of the algorithm.
/// * `rng` - Random number generator.
///
/// # Returns
///
/// A vector of populations representing the evolution over generations.
pub fn iterative_evolution(
    base_pop: &Population,
    fitness: &dyn FitnessFunction,
    param: &Param,
    running: Arc<AtomicBool>,
    rng: &mut ChaCha8Rng,
) -> Vec<Population> {
    let mut epoch: usize = 0;
    let mut populations: Vec<Population> = vec![];
    let mut cache = FitnessCache::new();

    let mut pop = base_pop.clone();
    debug!("Fitting base population...");
    pop.fit(fitness, &mut cache);
    pop = pop.sort();

    // Evolve!
    loop {
        epoch += 1;

        let (new_pop, evaluated) = evolve(pop, fitness, &mut cache, param, epoch, rng);
        pop = new_pop;

        cinfo!(param.general.display_colorful, "{}", display_generation(&pop, epoch, evaluated));

        // Stop criteria
        let mut need_to_break = false;

        if let Some(best) = pop.best() {
            if epoch >= param.ga.min_generations && epoch - best.epoch + 1 > param.ga.max_age_best_genotype {
                info!("Best genotype has reached limit age...");
                need_to_break = true;
            }
        }

        if epoch >= param.ga.max_generations {
            info!("Reach max generation");
            need_to_break = true;
        }

        if !running.load(Ordering::Relaxed) {
            info!("Signal received");
            need_to_break = true;
        }

        if param.general.keep_trace {
            populations.push(pop.clone())
        }

        if need_to_break {
            if populations.is_empty() {
                populations = vec![pop];
            }
            break;
        }
    }

    info!("{} distinct configurations evaluated", cache.len());
    populations
}

/// Run one evolution step: elite selection, cross-over, mutation, fitting
///
/// # Arguments
///
/// * `pop` - The current population to evolve, sorted by fit.
/// * `fitness` - The fitness oracle.
/// * `cache` - Fitness results of the phenotypes already evaluated in this run.
/// * `param` - Parameters for the genetic algorithm.
/// * `epoch` - The current generation number.
/// * `rng` - Random number generator.
///
/// # Returns
///
/// The next generation, sorted by fit, and the number of new fitness evaluations.
pub fn evolve(
    pop: Population,
    fitness: &dyn FitnessFunction,
    cache: &mut FitnessCache,
    param: &Param,
    epoch: usize,
    rng: &mut ChaCha8Rng,
) -> (Population, usize) {
    let (mut new_pop, n) = pop.select_first_pct(param.ga.select_elite_pct);
    debug!("{} elite genotypes retained", n);

    let children_number = param.ga.population_size.saturating_sub(n);
    let mut children = cross_over(&pop, children_number, param.ga.tournament_size, rng);
    mutate(&mut children, param, rng);

    for genotype in children.genotypes.iter_mut() {
        genotype.refresh();
        genotype.epoch = epoch;
    }

    let evaluated = children.fit(fitness, cache);

    new_pop.add(children);
    (new_pop.sort(), evaluated)
}

/// Index of the tournament winner: the best of `size` distinct random contenders.
/// The population is sorted by fit, so the winner is the lowest sampled index.
fn tournament(pop: &Population, size: usize, rng: &mut ChaCha8Rng) -> usize {
    let size = size.clamp(1, pop.len());
    sample(rng, pop.len(), size).into_iter().min().unwrap_or(0)
}

/// Perform crossover between tournament-selected parents to generate children
///
/// # Arguments
///
/// * `parents` - The population parents are drawn from, sorted by fit.
/// * `children_number` - The number of children to generate.
/// * `tournament_size` - Number of contenders per parent draw.
/// * `rng` - Random number generator.
///
/// # Returns
///
/// A population of children whose genes (with their expression) come position by
/// position from one parent or the other.
pub fn cross_over(parents: &Population, children_number: usize, tournament_size: usize, rng: &mut ChaCha8Rng) -> Population {
    let mut children = Population::new();
    if parents.is_empty() {
        return children;
    }

    for _ in 0..children_number {
        let p1 = &parents.genotypes[tournament(parents, tournament_size, rng)];
        let p2 = &parents.genotypes[tournament(parents, tournament_size, rng)];

        let mut child = p1.clone();
        for (i, gene) in child.features.genes.iter_mut().enumerate() {
            if rng.gen_bool(0.5) {
                *gene = p2.features.genes[i].clone();
            }
        }
        for (i, gene) in child.hyperparameters.genes.iter_mut().enumerate() {
            if rng.gen_bool(0.5) {
                *gene = p2.hyperparameters.genes[i].clone();
            }
        }
        child.refresh();
        children.genotypes.push(child);
    }
    children
}

/// Re-express each gene of each child with probability `ga.mutation_pct`%
///
/// # Arguments
///
/// * `children` - The population of children to mutate.
/// * `param` - Parameters for the genetic algorithm.
/// * `rng` - Random number generator.
pub fn mutate(children: &mut Population, param: &Param, rng: &mut ChaCha8Rng) {
    let p = (param.ga.mutation_pct / 100.0).clamp(0.0, 1.0);
    for child in children.genotypes.iter_mut() {
        let mut mutated = false;
        for gene in child.features.genes.iter_mut() {
            if rng.gen_bool(p) {
                gene.express(rng);
                mutated = true;
            }
        }
        for gene in child.hyperparameters.genes.iter_mut() {
            if rng.gen_bool(p) {
                gene.express(rng);
                mutated = true;
            }
        }
        if mutated {
            child.refresh();
        }
    }
}
