// Static operator texts for the help and examples commands.

pub const HELP_TEXT: &str = "\
rubac - generation based incremental backups driven by rsync

Usage: rubac [OPTIONS] [COMMAND]

Commands (at most one per invocation):
  -r, --run                 back up the selected clients, rotating generations
  -u, --update              re-sync into the newest generation in place
  -S, --snapshot LABEL      create a separately named snapshot generation
  -L, --list [compact]      list global and client settings
  -H, --history [INDEX]     list generations, or one generation's manifest
  -s, --search PATTERN      search manifests (case-insensitive regex)
  -P, --prune SELECTOR      delete one generation
  -R, --restore [PATH,..]   restore paths from a generation
  -V, --version             print the program version
  -h, --help                print this text
      --examples            print usage examples

Options:
  -c, --client ID[,ID..]    clients to act on (env RUBAC_CLIENT)
  -p, --profile NAME        profile name or file (env RUBAC_PROFILE)
      --datadir DIR         directory of the profile documents (env RUBAC_DATADIR)
  -b, --backup SELECTOR     generation for history, search and restore
      --restore-from FILE   restore the absolute paths listed in FILE
      --restore-to TARGET   restore into [host:]path
      --dest PATH           initialise and store the backup destination
      --logdir DIR          log directory
      --log NAME            log file name
      --mail ADDRESS        send a digest of each batch to ADDRESS
      --smtp HOST           mail relay
  -i, --include PATHS       paths to back up
  -x, --exclude PATTERNS    rsync exclude patterns
      --opts OPTIONS        extra rsync options
  -a, --address HOST        host a client is pulled from
  -n, --ninc N              number of incremental generations
      --compress            compress transfers (--no-compress to reset)
  -g, --global              apply settings to the global scope
  -D, --delete              remove the given settings, or the clients
  -d, --dry-run             let rsync only pretend, keep the profile
  -v, --verbose             debug output, detailed listings
  -q, --quiet               warnings and errors only

Selectors: a slot number, 'newest', 'oldest', or a generation name.
Without a command the given settings are stored in the profile.
";

pub const EXAMPLES_TEXT: &str = "\
Initialise a destination and configure a client:
  rubac --dest /mnt/backup --client esme --include /home/steeve,/etc --ninc 2

Exclude temporary directories everywhere:
  rubac --global --exclude '*/tmp/'

Remove that exclude again:
  rubac --global --delete --exclude '*/tmp/'

Run the backup, then look at the history:
  rubac --client esme --run
  rubac --client esme --history

Find every backed up .bashrc and restore the newest one:
  rubac --client esme --search '.bashrc$'
  rubac --client esme --restore /home/steeve/.bashrc --restore-to /tmp/restore

Take a snapshot before an upgrade and prune the oldest generation:
  rubac --client esme --snapshot pre-upgrade
  rubac --client esme --prune oldest
";
